//! Live audio visualization
//!
//! Turns the capture session's analysis tap into smooth, bounded visual
//! parameters at a fixed animation cadence. The tick loop reschedules
//! itself only after the current tick completes, so ticks never overlap
//! and the loop stops naturally on cancellation or source loss.

use crate::audio::AnalysisTap;
use crossbeam_channel::{Sender, TrySendError};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Default FFT size (128 frequency bins)
pub const DEFAULT_FFT_SIZE: usize = 256;

/// Derives a normalized mean amplitude from a window of samples
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    fft_size: usize,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    /// Create an analyzer with the given FFT size (must be a power of two)
    pub fn new(fft_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Hann window for better frequency resolution
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / (fft_size - 1) as f32).cos())
            })
            .collect();

        Self {
            fft,
            window,
            fft_size,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    /// Number of frequency bins (half the FFT size)
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Compute the normalized mean magnitude of the latest window.
    /// Shorter input is zero-padded at the front; output is in [0, 1].
    pub fn normalized_amplitude(&mut self, samples: &[f32]) -> f32 {
        let n = self.fft_size;

        for slot in self.scratch.iter_mut() {
            *slot = Complex::new(0.0, 0.0);
        }

        let take = samples.len().min(n);
        let offset = n - take;
        for (i, &sample) in samples[samples.len() - take..].iter().enumerate() {
            self.scratch[offset + i] = Complex::new(sample * self.window[offset + i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let bins = self.bin_count();
        let mean: f32 = self.scratch[..bins]
            .iter()
            .map(|c| c.norm())
            .sum::<f32>()
            / bins as f32;

        // Full-scale input peaks around fft_size/4 after windowing
        (mean * 4.0 / n as f32).clamp(0.0, 1.0)
    }
}

/// Visual parameters derived from one amplitude reading.
///
/// All mappings are fixed affine functions of the normalized amplitude,
/// so the same input always produces the same output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualParams {
    /// Hue in degrees, 0-360
    pub hue: f32,
    /// Saturation percent, 80-100
    pub saturation: f32,
    /// Lightness percent, 60-80
    pub lightness: f32,
    /// Blur radius in pixels, 0-20
    pub blur_px: f32,
    /// Scale factor, 1.0-1.08
    pub scale: f32,
    /// Glow opacity, 0.7-1.0
    pub glow_alpha: f32,
}

impl VisualParams {
    /// Map a normalized amplitude to display parameters
    pub fn from_amplitude(amplitude: f32) -> Self {
        let a = amplitude.clamp(0.0, 1.0);
        Self {
            hue: a * 360.0,
            saturation: 80.0 + a * 20.0,
            lightness: 60.0 + a * 20.0,
            blur_px: a * 20.0,
            scale: 1.0 + a * 0.08,
            glow_alpha: 0.7 + a * 0.3,
        }
    }
}

/// One visualization reading per animation tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VizSample {
    /// Parameters derived from the current spectrum
    Params(VisualParams),
    /// The live source is gone; the loop terminates after emitting this
    Unavailable,
}

/// Where the visualizer reads audio from. The two modes are mutually
/// exclusive and selected at construction.
pub enum VizSource {
    /// A capture session's analysis tap plus its liveness flag
    Live {
        tap: AnalysisTap,
        live: Arc<AtomicBool>,
    },
    /// Deterministic synthetic waveform, for running without a microphone
    Simulated,
}

/// Handle to a running visualizer loop
pub struct VizHandle {
    cancelled: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl VizHandle {
    /// Stop the tick loop. Idempotent.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for VizHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The live visualizer loop
pub struct Visualizer;

impl Visualizer {
    /// Start the tick loop, publishing one `VizSample` per tick
    pub fn start(
        source: VizSource,
        fft_size: usize,
        tick: Duration,
        sample_tx: Sender<VizSample>,
    ) -> VizHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancel_flag = Arc::clone(&cancelled);

        let worker = thread::spawn(move || {
            let mut analyzer = SpectrumAnalyzer::new(fft_size);
            let tick_secs = tick.as_secs_f32();
            let mut ticks: u64 = 0;

            info!("Visualizer started ({} bins)", analyzer.bin_count());

            while !cancel_flag.load(Ordering::SeqCst) {
                let amplitude = match &source {
                    VizSource::Live { tap, live } => {
                        if !live.load(Ordering::SeqCst) {
                            debug!("Capture session gone, stopping visualizer");
                            let _ = sample_tx.try_send(VizSample::Unavailable);
                            break;
                        }
                        let samples = tap.read(fft_size);
                        analyzer.normalized_amplitude(&samples)
                    }
                    VizSource::Simulated => {
                        simulated_amplitude(ticks as f32 * tick_secs, analyzer.bin_count())
                    }
                };

                let sample = VizSample::Params(VisualParams::from_amplitude(amplitude));
                match sample_tx.try_send(sample) {
                    Ok(()) => {}
                    // A slow consumer loses this tick; the loop never blocks
                    Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("Visualization consumer gone, stopping visualizer");
                        break;
                    }
                }

                ticks += 1;
                thread::sleep(tick);
            }

            info!("Visualizer stopped after {} ticks", ticks);
        });

        VizHandle {
            cancelled,
            worker: Some(worker),
        }
    }
}

/// Deterministic synthetic spectrum: a pulsating waveform whose mean
/// amplitude depends only on the tick time, so runs are reproducible.
pub fn simulated_amplitude(t: f32, bins: usize) -> f32 {
    let pulse = ((t * 5.0).sin() + 1.0) / 2.0;
    let amplitude = 50.0 + pulse * 150.0;

    let mut sum = 0.0;
    for i in 0..bins {
        let value = 128.0
            + (i as f32 * 0.1 + t * 10.0).sin() * amplitude * (i as f32 / bins as f32);
        sum += value.clamp(0.0, 255.0);
    }

    (sum / bins as f32) / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_mapping_is_deterministic() {
        // Same normalized amplitude must reproduce bit-for-bit
        let a = VisualParams::from_amplitude(0.35);
        let b = VisualParams::from_amplitude(0.35);
        assert_eq!(a, b);

        assert_eq!(a.hue, 0.35 * 360.0);
        assert_eq!(a.glow_alpha, 0.7 + 0.35 * 0.3);
        assert_eq!(a.scale, 1.0 + 0.35 * 0.08);
    }

    #[test]
    fn test_mapping_is_bounded() {
        let low = VisualParams::from_amplitude(-3.0);
        let high = VisualParams::from_amplitude(42.0);

        assert_eq!(low.hue, 0.0);
        assert_eq!(low.blur_px, 0.0);
        assert_eq!(high.hue, 360.0);
        assert_eq!(high.scale, 1.08);
        assert_eq!(high.glow_alpha, 1.0);
    }

    #[test]
    fn test_analyzer_silence_is_zero() {
        let mut analyzer = SpectrumAnalyzer::new(256);
        assert_eq!(analyzer.bin_count(), 128);
        assert_eq!(analyzer.normalized_amplitude(&vec![0.0; 256]), 0.0);
    }

    #[test]
    fn test_analyzer_tone_is_nonzero_and_bounded() {
        let mut analyzer = SpectrumAnalyzer::new(256);
        let tone: Vec<f32> = (0..256)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 8.0 / 256.0).sin())
            .collect();

        let amp = analyzer.normalized_amplitude(&tone);
        assert!(amp > 0.0 && amp <= 1.0);

        // Deterministic across calls
        assert_eq!(amp, analyzer.normalized_amplitude(&tone));
    }

    #[test]
    fn test_simulated_amplitude_reproducible() {
        let a = simulated_amplitude(1.25, 128);
        let b = simulated_amplitude(1.25, 128);
        assert_eq!(a, b);
        assert!(a > 0.0 && a <= 1.0);
    }

    #[test]
    fn test_live_loop_terminates_when_source_closes() {
        let tap = AnalysisTap::new(512);
        let live = Arc::new(AtomicBool::new(true));
        let (tx, rx) = unbounded();

        let mut handle = Visualizer::start(
            VizSource::Live {
                tap: tap.clone(),
                live: Arc::clone(&live),
            },
            256,
            Duration::from_millis(5),
            tx,
        );

        tap.write(&[0.5; 256]);
        std::thread::sleep(Duration::from_millis(30));

        // Session closes while the loop is running
        live.store(false, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));

        let samples: Vec<VizSample> = rx.try_iter().collect();
        assert!(matches!(samples.last(), Some(VizSample::Unavailable)));

        handle.cancel();
    }

    #[test]
    fn test_simulated_loop_emits_params() {
        let (tx, rx) = unbounded();
        let mut handle = Visualizer::start(
            VizSource::Simulated,
            256,
            Duration::from_millis(5),
            tx,
        );

        std::thread::sleep(Duration::from_millis(50));
        handle.cancel();

        let samples: Vec<VizSample> = rx.try_iter().collect();
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| matches!(s, VizSample::Params(_))));
    }
}

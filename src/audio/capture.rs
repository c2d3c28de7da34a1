use crate::audio::frame::FrameAccumulator;
use crate::audio::tap::AnalysisTap;
use crate::audio::AudioFrame;
use crate::{Result, VoxError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// One open microphone acquisition.
///
/// Owns the cpal input stream, the analysis tap feeding the visualizer,
/// and the mute flag. Exactly one session may be open at a time; the
/// voice state machine is the sole authority that opens and closes it.
pub struct CaptureSession {
    stream: Option<Stream>,
    sample_rate: u32,
    channels: u16,
    tap: AnalysisTap,
    muted: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
    device_lost_rx: Receiver<String>,
}

impl CaptureSession {
    /// Sample rate of the underlying device
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count of the underlying device (capture is mixed to mono)
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// The analysis tap shared with the visualizer
    pub fn tap(&self) -> AnalysisTap {
        self.tap.clone()
    }

    /// Whether this session still owns a running stream
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Shared liveness flag, cleared on close. The visualizer probes it
    /// to detect a session torn down while a tick was in flight.
    pub fn live_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.live)
    }

    /// Whether captured audio is currently muted
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Mute or unmute the captured track without tearing the session down.
    /// While muted the analysis tap keeps running on silent input.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        info!("Capture {}", if muted { "muted" } else { "unmuted" });
    }

    /// Check for an asynchronous mid-session device loss.
    /// The state machine treats this as an implicit stop.
    pub fn poll_device_lost(&self) -> Option<VoxError> {
        self.device_lost_rx
            .try_recv()
            .ok()
            .map(VoxError::DeviceUnavailable)
    }

    /// Stop all capture and release the stream. Idempotent: safe to call
    /// multiple times and safe on an already-closed session.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("Capture session closed");
        }
        self.live.store(false, Ordering::SeqCst);
        self.tap.clear();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Acquires and releases the microphone
pub struct CaptureManager;

impl CaptureManager {
    /// Request microphone access and start capturing.
    ///
    /// Full frames are emitted over `frame_tx`; recent samples are
    /// mirrored into the returned session's analysis tap. Acquisition
    /// failure is mapped by cause: cpal exposes no permission query, so
    /// denial is recognized from the rejection itself.
    pub fn open(frame_size: usize, frame_tx: Sender<AudioFrame>) -> Result<CaptureSession> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| VoxError::DeviceUnavailable("No input device available".into()))?;

        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config: StreamConfig = device
            .default_input_config()
            .map_err(|e| classify_capture_error(&e.to_string()))?
            .into();

        let sample_rate = config.sample_rate.0;
        let channels = config.channels;

        let tap = AnalysisTap::new(frame_size * 4);
        let muted = Arc::new(AtomicBool::new(false));
        let live = Arc::new(AtomicBool::new(true));
        let (device_lost_tx, device_lost_rx) = bounded::<String>(1);

        let stream = build_input_stream(
            &device,
            &config,
            FrameAccumulator::new(frame_size, frame_tx),
            tap.clone(),
            Arc::clone(&muted),
            Arc::clone(&live),
            device_lost_tx,
        )?;

        stream
            .play()
            .map_err(|e| classify_capture_error(&e.to_string()))?;

        info!("Capture session opened ({} Hz, {} ch)", sample_rate, channels);

        Ok(CaptureSession {
            stream: Some(stream),
            sample_rate,
            channels,
            tap,
            muted,
            live,
            device_lost_rx,
        })
    }
}

fn build_input_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut accumulator: FrameAccumulator,
    tap: AnalysisTap,
    muted: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
    device_lost_tx: Sender<String>,
) -> Result<Stream> {
    let channels = config.channels as usize;
    let mut mono = Vec::with_capacity(4096);

    let err_fn = move |err: cpal::StreamError| {
        error!("Audio input stream error: {}", err);
        if device_lost_tx.try_send(err.to_string()).is_err() {
            warn!("Device-loss signal already pending");
        }
    };

    device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !live.load(Ordering::SeqCst) {
                    return;
                }

                mono.clear();
                if channels == 1 {
                    mono.extend_from_slice(data);
                } else {
                    // Average all channels to create mono
                    mono.extend(
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
                    );
                }

                // Muted: the track goes silent but both consumers keep running
                if muted.load(Ordering::SeqCst) {
                    mono.fill(0.0);
                }

                accumulator.push_samples(&mono);
                tap.write(&mono);
            },
            err_fn,
            None,
        )
        .map_err(|e| classify_capture_error(&e.to_string()))
}

/// Map a platform rejection to a distinct user-displayable error kind
fn classify_capture_error(message: &str) -> VoxError {
    let lower = message.to_lowercase();
    if lower.contains("denied") || lower.contains("permission") || lower.contains("not allowed") {
        VoxError::PermissionDenied(message.to_string())
    } else {
        VoxError::DeviceUnavailable(message.to_string())
    }
}

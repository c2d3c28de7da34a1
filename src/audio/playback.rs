use crate::audio::resampler::resample_mono;
use crate::{Result, VoxError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver};
use hound::{SampleFormat, WavReader};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Decode WAV bytes to mono f32 samples.
/// Malformed input is reported as a decode failure, never a panic.
pub fn decode_wav_bytes(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| VoxError::Decode(format!("Malformed WAV payload: {}", e)))?;

    let spec = reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| VoxError::Decode(format!("Failed to read sample: {}", e)))?,
        SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| VoxError::Decode(format!("Failed to read sample: {}", e)))?
        }
    };

    let samples = if channels <= 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok((samples, spec.sample_rate))
}

/// One active playback of a decoded clip through the output device.
///
/// Fires a completion signal when the clip drains; `stop()` tears the
/// stream down early. The voice state machine ensures at most one
/// playback exists at a time.
pub struct Playback {
    stream: Option<Stream>,
    finished_rx: Receiver<()>,
    active: Arc<AtomicBool>,
}

impl Playback {
    /// Decode a WAV payload and play it through the default output device
    pub fn play_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let (samples, sample_rate) = decode_wav_bytes(bytes)?;
        Self::play(samples, sample_rate)
    }

    /// Play mono samples through the default output device,
    /// resampling to the device rate if needed
    pub fn play(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| VoxError::DeviceUnavailable("No output device available".into()))?;

        let config: StreamConfig = device
            .default_output_config()
            .map_err(|e| VoxError::DeviceUnavailable(format!("Failed to get output config: {}", e)))?
            .into();

        let device_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let samples = if sample_rate != device_rate {
            resample_mono(&samples, sample_rate, device_rate)?
        } else {
            samples
        };

        info!(
            "Playing {:.2}s of audio at {} Hz",
            samples.len() as f32 / device_rate as f32,
            device_rate
        );

        let queue = Arc::new(Mutex::new(samples));
        let active = Arc::new(AtomicBool::new(true));
        let (finished_tx, finished_rx) = bounded(1);

        let cb_queue = Arc::clone(&queue);
        let cb_active = Arc::clone(&active);

        let err_fn = |err| {
            error!("Audio output stream error: {}", err);
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !cb_active.load(Ordering::SeqCst) {
                        data.fill(0.0);
                        return;
                    }

                    let mut queue = cb_queue.lock();
                    let frames_needed = data.len() / channels;
                    let available = queue.len().min(frames_needed);

                    for i in 0..available {
                        let sample = queue[i];
                        for c in 0..channels {
                            data[i * channels + c] = sample;
                        }
                    }
                    queue.drain(0..available);
                    data[available * channels..].fill(0.0);

                    // Drained: fire the playback-ended notification once
                    if queue.is_empty() && cb_active.swap(false, Ordering::SeqCst) {
                        let _ = finished_tx.try_send(());
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| VoxError::DeviceUnavailable(format!("Failed to build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| VoxError::DeviceUnavailable(format!("Failed to start output stream: {}", e)))?;

        Ok(Self {
            stream: Some(stream),
            finished_rx,
            active,
        })
    }

    /// Whether the clip is still playing
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Non-blocking check for the completion event
    pub fn poll_finished(&self) -> bool {
        self.finished_rx.try_recv().is_ok()
    }

    /// Stop playback early and release the stream. Idempotent.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("Playback stopped");
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.stop();
    }
}

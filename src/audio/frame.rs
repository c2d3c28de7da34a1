use crossbeam_channel::{Sender, TrySendError};
use tracing::debug;

/// A full frame of normalized f32 samples, emitted as an owned copy
pub type AudioFrame = Vec<f32>;

/// Default samples per frame
pub const DEFAULT_FRAME_SIZE: usize = 2048;

/// Accumulates variable-length sample batches into fixed-size frames.
///
/// Runs inside the real-time audio callback: `push_samples` never blocks
/// and never grows the internal buffer. Full frames are handed off with
/// `try_send`; a full channel drops the frame rather than stalling the
/// callback.
pub struct FrameAccumulator {
    buffer: Vec<f32>,
    fill: usize,
    frame_size: usize,
    frame_tx: Sender<AudioFrame>,
}

impl FrameAccumulator {
    /// Create an accumulator with the given fixed frame size.
    /// The frame size is not reconfigurable once constructed.
    pub fn new(frame_size: usize, frame_tx: Sender<AudioFrame>) -> Self {
        assert!(frame_size > 0, "frame size must be non-zero");
        Self {
            buffer: vec![0.0; frame_size],
            fill: 0,
            frame_size,
            frame_tx,
        }
    }

    /// Get the configured frame size
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Number of samples buffered toward the next frame
    pub fn pending(&self) -> usize {
        self.fill
    }

    /// Push a batch of samples, emitting one frame per fill.
    /// Empty input is a no-op. Returns the number of frames emitted.
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        let mut emitted = 0;

        for &sample in samples {
            self.buffer[self.fill] = sample;
            self.fill += 1;

            if self.fill >= self.frame_size {
                // Emit a copy, never a live view of the internal buffer
                match self.frame_tx.try_send(self.buffer.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!("Frame channel full, dropping frame");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("Frame channel disconnected");
                    }
                }
                emitted += 1;
                self.fill = 0;
            }
        }

        emitted
    }
}

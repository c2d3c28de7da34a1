pub mod frame;
pub mod recorder;
pub mod tap;

#[cfg(feature = "audio-io")]
pub mod capture;
#[cfg(feature = "audio-io")]
pub mod playback;
#[cfg(feature = "audio-io")]
pub mod resampler;

pub use frame::{AudioFrame, FrameAccumulator, DEFAULT_FRAME_SIZE};
pub use recorder::{encode_wav_chunk, ChunkSink, Recorder, RecordingHandle};
pub use tap::AnalysisTap;

#[cfg(feature = "audio-io")]
pub use capture::{CaptureManager, CaptureSession};
#[cfg(feature = "audio-io")]
pub use playback::{decode_wav_bytes, Playback};

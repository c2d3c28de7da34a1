pub mod client;
pub mod transcript;

pub use client::{BackendClient, VoiceInputStatus};
pub use transcript::{SseParser, TranscriptEvent, TranscriptSignal, TranscriptStream};

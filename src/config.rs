//! Configuration for the voice chat client
//!
//! Provides centralized configuration for the audio pipeline and backend access.

/// Policy for speaking AI responses aloud after a text send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakPolicy {
    /// Responses are shown as text only
    Never,
    /// Every successful response is synthesized and played
    Always,
}

/// Configuration for the complete client
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the chat/transcription backend
    pub backend_url: String,

    /// Samples per emitted audio frame
    pub frame_size: usize,

    /// Recorder segment cadence in milliseconds
    pub chunk_interval_ms: u64,

    /// FFT size for the visualizer (frequency bin count is half of this)
    pub fft_size: usize,

    /// Visualizer tick interval in milliseconds
    pub viz_tick_ms: u64,

    /// Whether successful chat responses are also spoken
    pub speak_policy: SpeakPolicy,

    /// Drive the visualizer from a synthetic waveform instead of the microphone
    pub simulate_audio: bool,

    /// Whether to enable audio input
    pub enable_audio_input: bool,

    /// Whether to enable audio output
    pub enable_audio_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5000".to_string(),
            frame_size: 2048,
            chunk_interval_ms: 1500,
            fft_size: 256,
            viz_tick_ms: 16,
            speak_policy: SpeakPolicy::Never,
            simulate_audio: false,
            enable_audio_input: true,
            enable_audio_output: true,
        }
    }
}

impl Config {
    /// Create a configuration pointing at the given backend
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            ..Default::default()
        }
    }

    /// Set the frame size for the frame accumulator
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    /// Set the recorder chunk cadence
    pub fn with_chunk_interval_ms(mut self, interval_ms: u64) -> Self {
        self.chunk_interval_ms = interval_ms;
        self
    }

    /// Set the speak policy for chat responses
    pub fn with_speak_policy(mut self, policy: SpeakPolicy) -> Self {
        self.speak_policy = policy;
        self
    }

    /// Drive the visualizer from a synthetic waveform
    pub fn with_simulated_audio(mut self) -> Self {
        self.simulate_audio = true;
        self
    }

    /// Disable audio input (text-only mode)
    pub fn without_audio_input(mut self) -> Self {
        self.enable_audio_input = false;
        self
    }

    /// Disable audio output (text-only mode)
    pub fn without_audio_output(mut self) -> Self {
        self.enable_audio_output = false;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.backend_url.is_empty() {
            return Err("Backend URL is required".to_string());
        }

        if self.frame_size == 0 {
            return Err("Frame size must be non-zero".to_string());
        }

        if !self.fft_size.is_power_of_two() || self.fft_size < 32 {
            return Err(format!("FFT size must be a power of two >= 32: {}", self.fft_size));
        }

        if self.chunk_interval_ms == 0 {
            return Err("Chunk interval must be non-zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.frame_size, 2048);
        assert_eq!(config.fft_size, 256);
        assert_eq!(config.speak_policy, SpeakPolicy::Never);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("http://127.0.0.1:5000")
            .with_frame_size(1024)
            .with_speak_policy(SpeakPolicy::Always)
            .without_audio_output();

        assert_eq!(config.frame_size, 1024);
        assert_eq!(config.speak_policy, SpeakPolicy::Always);
        assert!(!config.enable_audio_output);
    }

    #[test]
    fn test_validate_rejects_bad_fft_size() {
        let mut config = Config::default();
        config.fft_size = 100;
        assert!(config.validate().is_err());

        config.fft_size = 0;
        assert!(config.validate().is_err());
    }
}

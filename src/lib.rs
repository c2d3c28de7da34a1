pub mod audio;
pub mod backend;
pub mod chat;
pub mod config;
pub mod messages;
pub mod utils;
pub mod viz;
pub mod voice;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum VoxError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Stream transport error: {0}")]
    StreamTransport(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VoxError {
    /// Check if this error is recoverable by retrying the triggering action
    pub fn is_recoverable(&self) -> bool {
        match self {
            // A denied permission needs user intervention in OS settings
            VoxError::PermissionDenied(_) => false,
            // Device may come back (replug, reselect)
            VoxError::DeviceUnavailable(_) => true,
            VoxError::StreamTransport(_) => true,
            VoxError::Backend(_) => true,
            VoxError::Decode(_) => true,
            VoxError::Channel(_) => false,
            VoxError::Config(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            VoxError::PermissionDenied(_) => {
                "Microphone access denied or not available.".to_string()
            }
            VoxError::DeviceUnavailable(_) => {
                "Audio device error. Please check your microphone/speakers.".to_string()
            }
            VoxError::StreamTransport(_) => {
                "Error: Could not connect to the server.".to_string()
            }
            VoxError::Backend(msg) => format!("Error: {}", msg),
            VoxError::Decode(_) => {
                "Audio playback failed. Response will be shown as text.".to_string()
            }
            VoxError::Channel(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            VoxError::Config(_) => "Configuration error. Please check settings.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VoxError>;

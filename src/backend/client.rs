use crate::{Result, VoxError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct VoiceInputResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    transcript: String,
}

#[derive(Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

/// Server-side voice input state after a toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceInputStatus {
    Started,
    Stopped,
}

/// Typed client for the chat/transcription/TTS backend.
///
/// The backend is a black box reached over HTTP; structured error
/// payloads surface as `Backend` errors, transport failures as
/// `StreamTransport`.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The shared HTTP client, for the transcript stream
    pub fn http(&self) -> reqwest::Client {
        self.http.clone()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST `/chat` with the user message, returning the assistant reply
    pub async fn chat(&self, message: &str) -> Result<String> {
        debug!("POST /chat ({} chars)", message.len());

        let body: ChatResponse = self
            .http
            .post(self.url("/chat"))
            .json(&ChatRequest { message })
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(transport_error)?;

        if let Some(error) = body.error {
            return Err(VoxError::Backend(error));
        }

        body.response
            .ok_or_else(|| VoxError::Backend("Empty chat response".to_string()))
    }

    /// POST `/voice-input`, flipping server-side voice capture on or off
    pub async fn toggle_voice_input(&self) -> Result<VoiceInputStatus> {
        let body: VoiceInputResponse = self
            .http
            .post(self.url("/voice-input"))
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(transport_error)?;

        if let Some(error) = body.error {
            return Err(VoxError::Backend(error));
        }

        match body.status.as_deref() {
            Some("started") => {
                info!("Backend voice input started");
                Ok(VoiceInputStatus::Started)
            }
            Some("stopped") => {
                info!("Backend voice input stopped");
                Ok(VoiceInputStatus::Stopped)
            }
            other => Err(VoxError::Backend(format!(
                "Unexpected voice-input status: {:?}",
                other
            ))),
        }
    }

    /// POST raw audio bytes to `/transcribe`, returning the transcript
    pub async fn transcribe(&self, audio: Vec<u8>, content_type: &str) -> Result<String> {
        debug!("POST /transcribe ({} bytes)", audio.len());

        let body: TranscribeResponse = self
            .http
            .post(self.url("/transcribe"))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(audio)
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(|e| VoxError::Backend(e.to_string()))?
            .json()
            .await
            .map_err(transport_error)?;

        Ok(body.transcript)
    }

    /// POST `/tts/speak`, returning synthesized audio bytes
    pub async fn speak(&self, text: &str) -> Result<Vec<u8>> {
        debug!("POST /tts/speak ({} chars)", text.len());

        let response = self
            .http
            .post(self.url("/tts/speak"))
            .json(&SpeakRequest { text })
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(|e| VoxError::Backend(e.to_string()))?;

        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

fn transport_error(e: reqwest::Error) -> VoxError {
    VoxError::StreamTransport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_cleanly() {
        let client = BackendClient::new("http://localhost:5000/");
        assert_eq!(client.url("/chat"), "http://localhost:5000/chat");
        assert_eq!(client.base_url(), "http://localhost:5000");
    }

    #[test]
    fn test_chat_response_shapes() {
        let ok: ChatResponse = serde_json::from_str(r#"{"response":"hi","status":"success"}"#).unwrap();
        assert_eq!(ok.response.as_deref(), Some("hi"));
        assert!(ok.error.is_none());

        let err: ChatResponse =
            serde_json::from_str(r#"{"error":"boom","response":"Sorry"}"#).unwrap();
        assert_eq!(err.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_voice_input_response_shapes() {
        let started: VoiceInputResponse = serde_json::from_str(r#"{"status":"started"}"#).unwrap();
        assert_eq!(started.status.as_deref(), Some("started"));

        let err: VoiceInputResponse = serde_json::from_str(r#"{"error":"no mic"}"#).unwrap();
        assert_eq!(err.error.as_deref(), Some("no mic"));
    }
}

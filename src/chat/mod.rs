//! Chat session controller
//!
//! Sends finalized user text to the backend and reconciles the message
//! list: a pending message appears immediately (optimistic), then moves
//! to sent or error exactly once when the call resolves.

use crate::backend::BackendClient;
use crate::config::SpeakPolicy;
use crate::messages::{DeliveryStatus, Message, MessageId, MessageStorage};
use crate::{Result, VoxError};
use tracing::{debug, info};

/// The seam between the controller and the chat backend, so tests can
/// substitute an in-memory fake.
pub trait ChatBackend: Send + Sync {
    fn chat(&self, message: &str) -> impl std::future::Future<Output = Result<String>> + Send;
}

impl ChatBackend for BackendClient {
    async fn chat(&self, message: &str) -> Result<String> {
        BackendClient::chat(self, message).await
    }
}

impl<T: ChatBackend> ChatBackend for std::sync::Arc<T> {
    async fn chat(&self, message: &str) -> Result<String> {
        (**self).chat(message).await
    }
}

/// Result of one send attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    /// Blank input: no message appended, no network call issued
    Rejected,
    /// Delivered; carries the assistant reply for optional speech
    Delivered { response: String },
    /// Marked error; carries the user-displayable error text
    Failed { error: String },
}

pub struct ChatController<B: ChatBackend> {
    backend: B,
    messages: MessageStorage,
    speak_policy: SpeakPolicy,
}

impl<B: ChatBackend> ChatController<B> {
    pub fn new(backend: B, messages: MessageStorage, speak_policy: SpeakPolicy) -> Self {
        Self {
            backend,
            messages,
            speak_policy,
        }
    }

    pub fn messages(&self) -> &MessageStorage {
        &self.messages
    }

    /// Whether a delivered response should also be synthesized
    pub fn should_speak(&self) -> bool {
        self.speak_policy == SpeakPolicy::Always
    }

    /// Send user text: optimistic pending append, backend call, reconcile.
    pub async fn send(&self, text: &str) -> SendResult {
        let user_id = match self.begin_send(text) {
            Some(id) => id,
            None => return SendResult::Rejected,
        };

        let result = self.backend.chat(text.trim()).await;
        self.apply_result(user_id, result)
    }

    /// Append the pending user message, or reject blank input as a no-op
    pub fn begin_send(&self, text: &str) -> Option<MessageId> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            debug!("Rejecting blank message");
            return None;
        }

        Some(self.messages.add(Message::user(trimmed)))
    }

    /// Reconcile a resolved backend call against the message list.
    /// Pure with respect to the network, so it is testable directly.
    pub fn apply_result(&self, user_id: MessageId, result: Result<String>) -> SendResult {
        match result {
            Ok(response) => {
                self.messages.update_status(user_id, DeliveryStatus::Sent);
                self.messages.add(Message::assistant(response.clone()));
                info!("Message delivered ({} chars in reply)", response.len());
                SendResult::Delivered { response }
            }
            Err(e) => {
                self.messages.update_status(user_id, DeliveryStatus::Error);
                let error = e.user_message();
                self.messages.add(Message::assistant_error(error.clone()));
                SendResult::Failed { error }
            }
        }
    }

    /// Append a backend-generated transcript/response pair directly
    /// (live transcription events that already carry a reply).
    pub fn append_exchange(&self, transcript: &str, response: &str, is_meitei: bool) {
        let mut user = Message::user(transcript).with_meitei(is_meitei);
        user.status = DeliveryStatus::Sent;
        self.messages.add(user);
        self.messages.add(Message::assistant(response));
    }

    /// Surface a pipeline failure as an assistant-style error message
    pub fn append_error(&self, error: &VoxError) {
        self.messages.add(Message::assistant_error(error.user_message()));
    }
}

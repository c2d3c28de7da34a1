use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique, monotonically increasing message identifier.
///
/// Minted from the epoch-millisecond clock, with rapid successive
/// allocations tie-broken by bumping past the last issued token so two
/// messages created in the same millisecond never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

static LAST_ID: AtomicU64 = AtomicU64::new(0);

impl MessageId {
    /// Allocate the next identifier
    pub fn next() -> Self {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut last = LAST_ID.load(Ordering::SeqCst);
        loop {
            let id = now.max(last + 1);
            match LAST_ID.compare_exchange(last, id, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return MessageId(id),
                Err(actual) => last = actual,
            }
        }
    }
}

/// Delivery status of a message. Transitions are monotonic:
/// `Pending -> Sent` or `Pending -> Error`, never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Error,
}

impl DeliveryStatus {
    /// Whether a transition to `next` is allowed
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        matches!(
            (self, next),
            (DeliveryStatus::Pending, DeliveryStatus::Sent)
                | (DeliveryStatus::Pending, DeliveryStatus::Error)
        )
    }

    /// Whether this is a terminal state
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

/// One entry in the chat transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub is_user: bool,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
    /// Transcript was recognized as Meitei Mayek script
    pub is_meitei: bool,
}

impl Message {
    /// Create a pending user message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::next(),
            text: text.into(),
            is_user: true,
            status: DeliveryStatus::Pending,
            timestamp: Utc::now(),
            is_meitei: false,
        }
    }

    /// Create an already-delivered assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::next(),
            text: text.into(),
            is_user: false,
            status: DeliveryStatus::Sent,
            timestamp: Utc::now(),
            is_meitei: false,
        }
    }

    /// Create an error-flagged assistant message
    pub fn assistant_error(text: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Error,
            ..Self::assistant(text)
        }
    }

    /// Mark the transcript text as Meitei Mayek
    pub fn with_meitei(mut self, is_meitei: bool) -> Self {
        self.is_meitei = is_meitei;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rapid_ids_are_unique_and_monotonic() {
        let ids: Vec<MessageId> = (0..1000).map(|_| MessageId::next()).collect();

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "ids must strictly increase");
        }
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        use DeliveryStatus::*;

        assert!(Pending.can_transition_to(Sent));
        assert!(Pending.can_transition_to(Error));
        assert!(!Sent.can_transition_to(Pending));
        assert!(!Sent.can_transition_to(Error));
        assert!(!Error.can_transition_to(Sent));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_message_constructors() {
        let user = Message::user("hello");
        assert!(user.is_user);
        assert_eq!(user.status, DeliveryStatus::Pending);

        let assistant = Message::assistant("hi");
        assert!(!assistant.is_user);
        assert_eq!(assistant.status, DeliveryStatus::Sent);

        let err = Message::assistant_error("Error: boom");
        assert_eq!(err.status, DeliveryStatus::Error);
    }
}

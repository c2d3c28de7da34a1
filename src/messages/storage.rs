use super::types::{DeliveryStatus, Message, MessageId};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

/// Thread-safe, append-ordered message list
#[derive(Debug, Clone)]
pub struct MessageStorage {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl MessageStorage {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn add(&self, message: Message) -> MessageId {
        let id = message.id;
        self.messages.write().push(message);
        id
    }

    pub fn get_all(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    pub fn get(&self, id: MessageId) -> Option<Message> {
        self.messages.read().iter().find(|m| m.id == id).cloned()
    }

    /// Apply a status transition, enforcing `Pending -> {Sent|Error}`.
    /// A disallowed transition is ignored and logged, never applied.
    pub fn update_status(&self, id: MessageId, status: DeliveryStatus) -> bool {
        let mut messages = self.messages.write();
        if let Some(message) = messages.iter_mut().find(|m| m.id == id) {
            if message.status.can_transition_to(status) {
                message.status = status;
                return true;
            }
            warn!(
                "Ignoring status transition {:?} -> {:?} for message {:?}",
                message.status, status, id
            );
        }
        false
    }

    pub fn clear(&self) {
        self.messages.write().clear();
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

impl Default for MessageStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let storage = MessageStorage::new();
        let id = storage.add(Message::user("hello"));

        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(id).unwrap().text, "hello");
    }

    #[test]
    fn test_status_update_monotonic() {
        let storage = MessageStorage::new();
        let id = storage.add(Message::user("hello"));

        assert!(storage.update_status(id, DeliveryStatus::Sent));
        assert_eq!(storage.get(id).unwrap().status, DeliveryStatus::Sent);

        // Terminal state never reversed
        assert!(!storage.update_status(id, DeliveryStatus::Error));
        assert!(!storage.update_status(id, DeliveryStatus::Pending));
        assert_eq!(storage.get(id).unwrap().status, DeliveryStatus::Sent);
    }

    #[test]
    fn test_update_unknown_id() {
        let storage = MessageStorage::new();
        assert!(!storage.update_status(MessageId(42), DeliveryStatus::Sent));
    }
}

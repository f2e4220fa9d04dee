//! Delivered envelopes awaiting acknowledgement, keyed by job UUID.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::AppError;

use super::{read, write};

/// Delivery record of one envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub job_uuid: String,
    pub topic: String,
    pub offset: i64,
}

#[derive(Debug, Default)]
struct Inner {
    messages: HashMap<String, Message>,
    committed: HashMap<String, i64>,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    inner: RwLock<Inner>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a delivery. A redelivery of the same job replaces the older record.
    pub fn add(&self, message: Message) {
        write(&self.inner)
            .messages
            .insert(message.job_uuid.clone(), message);
    }

    pub fn get(&self, job_uuid: &str) -> Result<Message, AppError> {
        read(&self.inner)
            .messages
            .get(job_uuid)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no message for job {}", job_uuid)))
    }

    /// Acknowledge the message of a job; the committed offset never moves back
    pub fn commit(&self, job_uuid: &str) -> Result<Message, AppError> {
        let mut inner = write(&self.inner);
        let message = inner
            .messages
            .remove(job_uuid)
            .ok_or_else(|| AppError::NotFound(format!("no message for job {}", job_uuid)))?;
        let committed = inner.committed.entry(message.topic.clone()).or_insert(-1);
        *committed = (*committed).max(message.offset);
        Ok(message)
    }

    pub fn remove(&self, job_uuid: &str) -> Result<Message, AppError> {
        write(&self.inner)
            .messages
            .remove(job_uuid)
            .ok_or_else(|| AppError::NotFound(format!("no message for job {}", job_uuid)))
    }

    /// Highest committed offset of a topic
    #[must_use]
    pub fn committed_offset(&self, topic: &str) -> Option<i64> {
        read(&self.inner).committed.get(topic).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.inner).messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.inner).messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(job: &str, offset: i64) -> Message {
        Message {
            job_uuid: job.to_string(),
            topic: "topic".to_string(),
            offset,
        }
    }

    #[test]
    fn test_commit_tracks_highest_offset() {
        let store = MessageStore::new();
        store.add(message("a", 5));
        store.add(message("b", 3));

        store.commit("a").unwrap();
        store.commit("b").unwrap();
        assert_eq!(store.committed_offset("topic"), Some(5));
        assert!(store.is_empty());
        assert!(store.commit("a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_redelivery_replaces_record() {
        let store = MessageStore::new();
        store.add(message("a", 1));
        store.add(message("a", 9));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().offset, 9);
        assert_eq!(store.committed_offset("topic"), None);
    }
}

//! In-process message bus over a bounded tokio channel.
//!
//! The publisher stamps each envelope with the next offset of its topic,
//! the way a partitioned log would.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::{AppError, Envelope, ExternalServiceError, JobEventPublisher};

pub struct ChannelPublisher {
    sender: mpsc::Sender<Envelope>,
    offsets: Mutex<HashMap<String, i64>>,
}

/// Create a publisher and the receiving end to hand to the consumer
#[must_use]
pub fn channel(capacity: usize) -> (ChannelPublisher, mpsc::Receiver<Envelope>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        ChannelPublisher {
            sender,
            offsets: Mutex::new(HashMap::new()),
        },
        receiver,
    )
}

impl ChannelPublisher {
    fn next_offset(&self, topic: &str) -> i64 {
        let mut offsets = self
            .offsets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let offset = offsets.entry(topic.to_string()).or_insert(0);
        *offset += 1;
        *offset
    }
}

#[async_trait]
impl JobEventPublisher for ChannelPublisher {
    async fn publish(&self, mut envelope: Envelope) -> Result<(), AppError> {
        envelope.offset = self.next_offset(&envelope.topic);
        debug!(topic = %envelope.topic, offset = envelope.offset, "Publishing envelope");
        self.sender.send(envelope).await.map_err(|_| {
            AppError::ExternalService(ExternalServiceError::Unavailable(
                "message bus closed".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobType, PENDING_JOB_TOPIC};

    #[tokio::test]
    async fn test_offsets_increase_per_topic() {
        let (publisher, mut receiver) = channel(4);
        for uuid in ["j1", "j2"] {
            let job = Job::new(uuid, "c1", "t", JobType::EthTransaction);
            publisher.publish(Envelope::pending_job(job, 0)).await.unwrap();
        }

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.topic, PENDING_JOB_TOPIC);
        assert_eq!((first.offset, second.offset), (1, 2));
    }

    #[tokio::test]
    async fn test_publish_after_receiver_dropped() {
        let (publisher, receiver) = channel(1);
        drop(receiver);
        let job = Job::new("j1", "c1", "t", JobType::EthTransaction);
        let err = publisher.publish(Envelope::pending_job(job, 0)).await.unwrap_err();
        assert!(err.is_retryable());
    }
}

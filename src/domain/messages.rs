//! Inbound message envelopes.
//!
//! The transport delivers opaque JSON bodies tagged with a `type`
//! discriminator. Decoding happens here, at the boundary, into a closed set
//! of payload variants.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::AppError;
use super::types::{Job, Subscription};

/// Topic used for job lifecycle messages
pub const PENDING_JOB_TOPIC: &str = "tx-listener.pending-jobs";

/// Topic used for subscription lifecycle messages
pub const SUBSCRIPTION_TOPIC: &str = "tx-listener.subscriptions";

/// What happened to a subscription
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    Created,
    Updated,
    Deleted,
}

/// Subscription change event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SubscriptionEvent {
    pub action: SubscriptionAction,
    pub subscription: Subscription,
}

/// Payload variants carried by an envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "type", content = "body", rename_all = "kebab-case")]
pub enum MessagePayload {
    PendingJob(Box<Job>),
    Subscription(SubscriptionEvent),
}

impl MessagePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PendingJob(_) => "pending-job",
            Self::Subscription(_) => "subscription",
        }
    }
}

/// Envelope delivered by the message transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Envelope {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub offset: i64,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

impl Envelope {
    #[must_use]
    pub fn pending_job(job: Job, offset: i64) -> Self {
        Self {
            topic: PENDING_JOB_TOPIC.to_string(),
            offset,
            payload: MessagePayload::PendingJob(Box::new(job)),
        }
    }

    #[must_use]
    pub fn subscription(event: SubscriptionEvent, offset: i64) -> Self {
        Self {
            topic: SUBSCRIPTION_TOPIC.to_string(),
            offset,
            payload: MessagePayload::Subscription(event),
        }
    }

    /// Job the envelope is correlated to, if any
    #[must_use]
    pub fn job_uuid(&self) -> Option<&str> {
        match &self.payload {
            MessagePayload::PendingJob(job) => Some(&job.uuid),
            MessagePayload::Subscription(_) => None,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        serde_json::from_slice(bytes).map_err(|e| AppError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobType;
    use serde_json::json;

    #[test]
    fn test_decode_pending_job_envelope() {
        let job = Job::new("job-1", "chain-1", "tenant", JobType::EthTransaction);
        let raw = json!({
            "topic": PENDING_JOB_TOPIC,
            "offset": 42,
            "type": "pending-job",
            "body": job,
        });

        let envelope = Envelope::decode(raw.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.offset, 42);
        assert_eq!(envelope.job_uuid(), Some("job-1"));
        assert_eq!(envelope.payload.kind(), "pending-job");
    }

    #[test]
    fn test_decode_subscription_envelope() {
        let raw = json!({
            "type": "subscription",
            "body": {
                "action": "deleted",
                "subscription": {
                    "uuid": "sub-1",
                    "chain_uuid": "chain-1",
                    "contract_address": "0xabc"
                }
            }
        });

        let envelope = Envelope::decode(raw.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.offset, 0);
        assert!(envelope.job_uuid().is_none());
        match envelope.payload {
            MessagePayload::Subscription(event) => {
                assert_eq!(event.action, SubscriptionAction::Deleted);
                assert_eq!(event.subscription.uuid, "sub-1");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let raw = json!({ "type": "account", "body": {} });
        let result = Envelope::decode(raw.to_string().as_bytes());
        assert!(matches!(result, Err(AppError::Deserialization(_))));
    }
}

//! Inbound message handler.
//!
//! Decoded envelopes are dispatched to the pending-job or subscription
//! use-case. Transient failures are retried with capped exponential backoff;
//! a pending job that cannot be registered is reported as FAILED.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::app::cancel::sleep;
use crate::app::config::ConsumerConfig;
use crate::app::usecases::{PendingJobOutcome, PendingJobUseCase, SubscriptionUseCase};
use crate::domain::{
    AppError, Envelope, Job, JobStatus, MessagePayload, OrchestrationClient, SubscriptionEvent,
    UpdateJobRequest,
};
use crate::store::{Message, MessageStore};

/// Maximum exponent for backoff calculation
const MAX_BACKOFF_EXPONENT: u32 = 8;

pub struct MessageConsumer {
    messages: Arc<MessageStore>,
    pending_jobs: Arc<PendingJobUseCase>,
    subscriptions: Arc<SubscriptionUseCase>,
    orchestration: Arc<dyn OrchestrationClient>,
    config: ConsumerConfig,
}

impl MessageConsumer {
    #[must_use]
    pub fn new(
        messages: Arc<MessageStore>,
        pending_jobs: Arc<PendingJobUseCase>,
        subscriptions: Arc<SubscriptionUseCase>,
        orchestration: Arc<dyn OrchestrationClient>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            messages,
            pending_jobs,
            subscriptions,
            orchestration,
            config,
        }
    }

    #[instrument(skip(self, envelope, token), fields(kind = envelope.payload.kind(), topic = %envelope.topic, offset = envelope.offset))]
    pub async fn handle(&self, envelope: Envelope, token: &CancellationToken) -> Result<(), AppError> {
        let Envelope {
            topic,
            offset,
            payload,
        } = envelope;
        match payload {
            MessagePayload::PendingJob(job) => {
                self.messages.add(Message {
                    job_uuid: job.uuid.clone(),
                    topic,
                    offset,
                });
                self.handle_pending_job(*job, token).await.map(|_| ())
            }
            MessagePayload::Subscription(event) => self.handle_subscription(event, token).await,
        }
    }

    async fn handle_pending_job(
        &self,
        job: Job,
        token: &CancellationToken,
    ) -> Result<PendingJobOutcome, AppError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.pending_jobs.execute(job.clone(), token).await {
                Ok(outcome) => {
                    info!(job_uuid = %job.uuid, outcome = ?outcome, "Pending job handled");
                    return Ok(outcome);
                }
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        job_uuid = %job.uuid,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Pending job intake failed, retrying"
                    );
                    sleep(token, delay).await?;
                }
                Err(e) => {
                    error!(job_uuid = %job.uuid, attempts = attempt, error = %e, "Pending job intake failed");
                    self.fail_job(&job, &e).await;
                    return Err(e);
                }
            }
        }
    }

    async fn handle_subscription(
        &self,
        event: SubscriptionEvent,
        token: &CancellationToken,
    ) -> Result<(), AppError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.subscriptions.execute(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        subscription_uuid = %event.subscription.uuid,
                        attempt = attempt,
                        error = %e,
                        "Subscription event failed, retrying"
                    );
                    sleep(token, delay).await?;
                }
                Err(e) => {
                    error!(subscription_uuid = %event.subscription.uuid, error = %e, "Subscription event failed");
                    return Err(e);
                }
            }
        }
    }

    async fn fail_job(&self, job: &Job, cause: &AppError) {
        let request = UpdateJobRequest::status(JobStatus::Failed, cause.to_string());
        if let Err(e) = self.orchestration.update_job(&job.uuid, &request).await {
            warn!(job_uuid = %job.uuid, error = %e, "Failed to report job failure");
        }
        if let Err(e) = self.messages.remove(&job.uuid)
            && !e.is_not_found()
        {
            warn!(job_uuid = %job.uuid, error = %e, "Failed to drop message");
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = calculate_backoff(attempt, &self.config);
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        ceiling.mul_f64(jitter).min(self.config.max_backoff)
    }
}

/// Exponential backoff before jitter: `base * 2^(attempt - 1)`, capped
fn calculate_backoff(attempt: u32, config: &ConsumerConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    config
        .backoff_base
        .saturating_mul(2_u32.pow(exponent))
        .min(config.max_backoff)
}

//! Intake of jobs whose transaction was broadcast.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::app::cancel::with_cancel;
use crate::app::listener::ChainSessionManager;
use crate::app::sentry::RetrySessionManager;
use crate::domain::{AppError, ChainClient, Job, OrchestrationClient, ValidationError};
use crate::store::{MessageStore, PendingJobStore};

use super::mined_job::MinedJobUseCase;

/// What intake did with a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingJobOutcome {
    /// Same job and transaction already tracked
    Duplicate,
    /// Receipt already available, finalized without tracking
    AlreadyMined,
    /// Tracked until its transaction shows up in a block
    Tracked,
}

pub struct PendingJobUseCase {
    pending: Arc<PendingJobStore>,
    messages: Arc<MessageStore>,
    chain_sessions: Arc<ChainSessionManager>,
    retry_sessions: Arc<RetrySessionManager>,
    mined: Arc<MinedJobUseCase>,
    chain_client: Arc<dyn ChainClient>,
    orchestration: Arc<dyn OrchestrationClient>,
}

impl PendingJobUseCase {
    #[must_use]
    pub fn new(
        pending: Arc<PendingJobStore>,
        messages: Arc<MessageStore>,
        chain_sessions: Arc<ChainSessionManager>,
        retry_sessions: Arc<RetrySessionManager>,
        mined: Arc<MinedJobUseCase>,
        chain_client: Arc<dyn ChainClient>,
        orchestration: Arc<dyn OrchestrationClient>,
    ) -> Self {
        Self {
            pending,
            messages,
            chain_sessions,
            retry_sessions,
            mined,
            chain_client,
            orchestration,
        }
    }

    #[instrument(skip(self, job, token), fields(job_uuid = %job.uuid, chain_uuid = %job.chain_uuid))]
    pub async fn execute(
        &self,
        job: Job,
        token: &CancellationToken,
    ) -> Result<PendingJobOutcome, AppError> {
        let tx_hash = job
            .tx_hash()
            .ok_or_else(|| {
                AppError::Validation(ValidationError::MissingField("transaction.hash".to_string()))
            })?
            .to_string();

        let existing = match self.pending.get_by_job_uuid(&job.uuid) {
            Ok(existing) => Some(existing),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        if let Some(existing) = &existing
            && existing
                .tx_hash()
                .is_some_and(|hash| hash.eq_ignore_ascii_case(&tx_hash))
        {
            debug!(tx_hash = %tx_hash, "Job already pending, skipping duplicate");
            self.commit(&job.uuid);
            return Ok(PendingJobOutcome::Duplicate);
        }

        let chain = self
            .chain_sessions
            .resolve_chain(&job.chain_uuid)
            .await
            .map_err(|e| e.in_component("pending-job"))?;

        let url = self.orchestration.chain_proxy_url(&job.chain_uuid);
        let receipt = with_cancel(token, self.chain_client.transaction_receipt(&url, &tx_hash))
            .await
            .map_err(|e| e.in_component("pending-job"))?;

        if let Some(receipt) = receipt {
            info!(tx_hash = %tx_hash, "Transaction already mined at intake");
            self.mined.execute_with_receipt(job.clone(), receipt, token).await?;
            if let Err(e) = self.pending.remove(&job.uuid)
                && !e.is_not_found()
            {
                warn!(error = %e, "Failed to drop stale pending entry");
            }
            self.commit(&job.uuid);
            return Ok(PendingJobOutcome::AlreadyMined);
        }

        // Registered before the session is ensured so a winding down session sees it
        if existing.is_some() {
            self.pending.update(job.clone())?;
            info!(tx_hash = %tx_hash, "Pending job transaction updated");
        } else {
            self.pending.add(job.clone())?;
            info!(tx_hash = %tx_hash, "Pending job registered");
        }

        self.chain_sessions
            .ensure_session(chain)
            .map_err(|e| e.in_component("pending-job"))?;

        if job.should_be_retried() {
            match self.retry_sessions.start_session(job.clone()) {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => {
                    debug!("Tx-sentry already running")
                }
                Err(e) => return Err(e.in_component("pending-job")),
            }
        }

        self.commit(&job.uuid);
        Ok(PendingJobOutcome::Tracked)
    }

    fn commit(&self, job_uuid: &str) {
        match self.messages.commit(job_uuid) {
            Ok(message) => debug!(offset = message.offset, topic = %message.topic, "Message committed"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(error = %e, "Failed to commit message"),
        }
    }
}

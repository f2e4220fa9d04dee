//! Tx-sentry session: periodic resubmission of one pending job.

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::cancel::with_cancel;
use crate::domain::{
    AppError, InternalData, Job, JobFilters, JobStatus, OrchestrationClient, UpdateJobRequest,
};
use crate::store::PendingJobStore;

use super::retry::RetryUseCase;

/// Retries already spent on a lineage, rebuilt from the orchestration API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryProgress {
    pub n_children: usize,
    pub last_child_uuid: String,
    pub n_retries: usize,
}

impl RetryProgress {
    /// `lineage` holds the parent and its children, ordered by creation
    #[must_use]
    pub fn from_lineage(parent_uuid: &str, lineage: &[Job]) -> Self {
        let n_children = lineage.len().saturating_sub(1);
        let last = lineage.last();
        let n_resends = last.map_or(0, |job| {
            job.logs
                .iter()
                .filter(|log| log.status == JobStatus::Resending)
                .count()
        });
        Self {
            n_children,
            last_child_uuid: last.map_or_else(|| parent_uuid.to_string(), |job| job.uuid.clone()),
            n_retries: n_children + n_resends,
        }
    }
}

pub struct RetryJobSession {
    job: Job,
    orchestration: Arc<dyn OrchestrationClient>,
    pending: Arc<PendingJobStore>,
    retry: Arc<RetryUseCase>,
    max_retries: usize,
}

impl RetryJobSession {
    #[must_use]
    pub fn new(
        job: Job,
        orchestration: Arc<dyn OrchestrationClient>,
        pending: Arc<PendingJobStore>,
        retry: Arc<RetryUseCase>,
        max_retries: u32,
    ) -> Self {
        Self {
            job,
            orchestration,
            pending,
            retry,
            max_retries: max_retries as usize,
        }
    }

    /// Runs until the lineage is resolved, the retry budget is spent or
    /// `token` fires. Cancellation is a clean exit.
    pub async fn run(self, token: CancellationToken) -> Result<(), AppError> {
        match self.run_inner(&token).await {
            Err(AppError::Cancelled) => {
                debug!(job_uuid = %self.job.uuid, "Tx-sentry cancelled");
                Ok(())
            }
            other => other,
        }
    }

    async fn run_inner(&self, token: &CancellationToken) -> Result<(), AppError> {
        let job_uuid = self.job.uuid.as_str();
        let period = self.job.internal_data.retry_interval().ok_or_else(|| {
            AppError::InvalidState(format!("job {} has no retry interval", job_uuid))
        })?;

        let filters = JobFilters {
            parent_job_uuid: Some(job_uuid.to_string()),
            ..Default::default()
        };
        let lineage = with_cancel(token, self.orchestration.search_jobs(&filters)).await?;
        let mut progress = RetryProgress::from_lineage(job_uuid, &lineage);

        if progress.n_retries >= self.max_retries {
            info!(
                job_uuid = %job_uuid,
                n_retries = progress.n_retries,
                "Retry budget already spent, tx-sentry not started"
            );
            return Ok(());
        }

        info!(
            job_uuid = %job_uuid,
            n_children = progress.n_children,
            n_retries = progress.n_retries,
            period_ms = period.as_millis() as u64,
            "Tx-sentry started"
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(AppError::Cancelled),
                _ = ticker.tick() => {}
            }

            if !self.is_still_pending() {
                info!(job_uuid = %job_uuid, "Job no longer pending, tx-sentry stopping");
                return Ok(());
            }

            let carrier = with_cancel(
                token,
                self.retry
                    .execute(&self.job, &progress.last_child_uuid, progress.n_children),
            )
            .await?;

            if carrier.is_empty() {
                info!(job_uuid = %job_uuid, "No retry performed, tx-sentry stopping");
                return Ok(());
            }
            if carrier != progress.last_child_uuid {
                progress.n_children += 1;
                progress.last_child_uuid = carrier;
            }
            progress.n_retries += 1;

            if progress.n_retries >= self.max_retries {
                self.mark_retried(token).await?;
                info!(
                    job_uuid = %job_uuid,
                    n_retries = progress.n_retries,
                    "Maximum retries reached, tx-sentry stopping"
                );
                return Ok(());
            }
        }
    }

    fn is_still_pending(&self) -> bool {
        let current = match self.pending.get_by_job_uuid(&self.job.uuid) {
            Ok(job) => job,
            Err(_) => return false,
        };
        current
            .tx_hash()
            .is_some_and(|hash| self.pending.get_by_tx_hash(&current.chain_uuid, hash).is_ok())
    }

    async fn mark_retried(&self, token: &CancellationToken) -> Result<(), AppError> {
        let request = UpdateJobRequest {
            status: Some(JobStatus::Warning),
            message: Some(format!(
                "reached the maximum of {} retries",
                self.max_retries
            )),
            internal_data: Some(InternalData {
                has_been_retried: true,
                ..self.job.internal_data.clone()
            }),
            ..Default::default()
        };
        if let Err(e) = with_cancel(token, self.orchestration.update_job(&self.job.uuid, &request)).await {
            warn!(job_uuid = %self.job.uuid, error = %e, "Failed to mark job as retried");
            return Err(e.in_component("tx-sentry"));
        }
        Ok(())
    }
}

//! Owner of the tx-sentry sessions: at most one per job.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::app::config::SentryConfig;
use crate::domain::{AppError, Job, OrchestrationClient};
use crate::store::{PendingJobStore, RetrySession, RetrySessionStore};

use super::retry::RetryUseCase;
use super::session::RetryJobSession;

pub struct RetrySessionManager {
    sessions: Arc<RetrySessionStore>,
    pending: Arc<PendingJobStore>,
    orchestration: Arc<dyn OrchestrationClient>,
    retry: Arc<RetryUseCase>,
    config: SentryConfig,
    /// Terminal errors of sessions that failed, until collected by `stop_session`
    /// or until the lineage leaves the pending store
    errors: Arc<DashMap<String, AppError>>,
    next_session_id: AtomicU64,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl RetrySessionManager {
    #[must_use]
    pub fn new(
        sessions: Arc<RetrySessionStore>,
        pending: Arc<PendingJobStore>,
        orchestration: Arc<dyn OrchestrationClient>,
        retry: Arc<RetryUseCase>,
        config: SentryConfig,
        root: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            sessions,
            pending,
            orchestration,
            retry,
            config,
            errors: Arc::new(DashMap::new()),
            next_session_id: AtomicU64::new(1),
            root,
            tracker,
        }
    }

    /// Launch a tx-sentry for `job`; `AlreadyExists` if one is running
    pub fn start_session(&self, job: Job) -> Result<(), AppError> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        self.sessions.add(RetrySession {
            job: job.clone(),
            session_id,
            cancel: token.clone(),
        })?;
        self.errors.remove(&job.uuid);

        let session = RetryJobSession::new(
            job.clone(),
            Arc::clone(&self.orchestration),
            Arc::clone(&self.pending),
            Arc::clone(&self.retry),
            self.config.max_retries,
        );
        let sessions = Arc::clone(&self.sessions);
        let errors = Arc::clone(&self.errors);
        let pending = Arc::clone(&self.pending);
        let job_uuid = job.uuid;

        self.tracker.spawn(async move {
            match session.run(token).await {
                Ok(()) => info!(job_uuid = %job_uuid, "Tx-sentry session ended"),
                Err(e) if e.is_invalid_state() => {
                    warn!(job_uuid = %job_uuid, error = %e, "Tx-sentry session ended early")
                }
                Err(e) => {
                    error!(job_uuid = %job_uuid, error = %e, "Tx-sentry session failed");
                    errors.retain(|uuid, _| pending.get_by_job_uuid(uuid).is_ok());
                    errors.insert(job_uuid.clone(), e);
                }
            }
            sessions.remove_session(&job_uuid, session_id);
        });

        Ok(())
    }

    /// Cancel the session of `job_uuid`.
    ///
    /// Returns the terminal error of the session if it failed, `NotFound`
    /// if nothing was tracked for the job.
    pub fn stop_session(&self, job_uuid: &str) -> Result<(), AppError> {
        let stashed = self.errors.remove(job_uuid).map(|(_, e)| e);
        match self.sessions.remove(job_uuid) {
            Ok(session) => {
                session.cancel.cancel();
                info!(job_uuid = %job_uuid, "Tx-sentry session stopped");
                stashed.map_or(Ok(()), Err)
            }
            Err(not_found) => Err(stashed.unwrap_or(not_found)),
        }
    }

    /// Cancel every session of a chain, returning how many were stopped
    pub fn stop_chain_sessions(&self, chain_uuid: &str) -> usize {
        let stopped = self.sessions.delete_per_chain_uuid(chain_uuid);
        for session in &stopped {
            session.cancel.cancel();
            self.errors.remove(&session.job.uuid);
        }
        if !stopped.is_empty() {
            info!(chain_uuid = %chain_uuid, count = stopped.len(), "Tx-sentry sessions stopped");
        }
        stopped.len()
    }

    #[must_use]
    pub fn is_running(&self, job_uuid: &str) -> bool {
        self.sessions.get_by_job_uuid(job_uuid).is_ok()
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

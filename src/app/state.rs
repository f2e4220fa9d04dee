//! Application state management.

use std::sync::Arc;

use crate::domain::HealthResponse;

use super::jobs::JobService;
use super::tx_listener::TxListener;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
    /// Absent when the listener subsystem is disabled
    pub tx_listener: Option<Arc<TxListener>>,
}

impl AppState {
    /// Create a new application state
    #[must_use]
    pub fn new(jobs: Arc<JobService>) -> Self {
        Self {
            jobs,
            tx_listener: None,
        }
    }

    /// Attach the listener subsystem (builder pattern)
    #[must_use]
    pub fn with_tx_listener(mut self, tx_listener: Arc<TxListener>) -> Self {
        self.tx_listener = Some(tx_listener);
        self
    }

    pub async fn health_check(&self) -> HealthResponse {
        let (chains, retries) = self
            .tx_listener
            .as_ref()
            .map_or((0, 0), |l| (l.chain_sessions(), l.retry_sessions()));
        self.jobs.health_check(chains, retries).await
    }
}

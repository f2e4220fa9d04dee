//! One retry step of a tx-sentry session.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::domain::{AppError, Job, OrchestrationClient, RetryJobTxRequest};

/// Tolerance when comparing the cumulative increment to its limit
const INCREMENT_EPSILON: f64 = 1e-9;

pub struct RetryUseCase {
    orchestration: Arc<dyn OrchestrationClient>,
}

impl RetryUseCase {
    #[must_use]
    pub fn new(orchestration: Arc<dyn OrchestrationClient>) -> Self {
        Self { orchestration }
    }

    /// Resend or replace the transaction of a lineage.
    ///
    /// Returns the UUID of the job now carrying the lineage: `last_child_uuid`
    /// after a resend, a new child after a fee bump, or an empty string when
    /// the gas limit forbids another bump.
    #[instrument(skip(self, parent), fields(job_uuid = %parent.uuid))]
    pub async fn execute(
        &self,
        parent: &Job,
        last_child_uuid: &str,
        n_children: usize,
    ) -> Result<String, AppError> {
        let increment = parent.internal_data.gas_price_increment;
        if increment <= 0.0 {
            self.orchestration
                .resend_job_tx(last_child_uuid)
                .await
                .map_err(|e| e.in_component("tx-sentry"))?;
            info!(job_uuid = %last_child_uuid, "Transaction resent");
            return Ok(last_child_uuid.to_string());
        }

        let cumulative = increment * (n_children as f64 + 1.0);
        let limit = parent.internal_data.gas_price_limit;
        if limit > 0.0 && cumulative > limit + INCREMENT_EPSILON {
            info!(
                cumulative,
                limit, "Gas price increment limit reached, no further retry"
            );
            return Ok(String::new());
        }

        let request = RetryJobTxRequest {
            gas_increment: cumulative,
            data: None,
        };
        let child = self
            .orchestration
            .retry_job_tx(&parent.uuid, &request)
            .await
            .map_err(|e| e.in_component("tx-sentry"))?;

        info!(
            child_uuid = %child.uuid,
            gas_increment = cumulative,
            "Retry child job created"
        );
        Ok(child.uuid)
    }
}

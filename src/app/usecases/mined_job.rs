//! Finalization of jobs whose transaction was observed in a block.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::app::cancel::{sleep, with_cancel};
use crate::app::config::MinedJobConfig;
use crate::app::sentry::RetrySessionManager;
use crate::domain::{
    AppError, BlockchainError, ChainClient, Job, JobStatus, JobType, OrchestrationClient, Receipt,
    TransactionType, UpdateJobRequest, ValidationError,
};
use crate::store::PendingJobStore;

use super::register_contract::RegisterContractUseCase;

pub struct MinedJobUseCase {
    chain_client: Arc<dyn ChainClient>,
    orchestration: Arc<dyn OrchestrationClient>,
    pending: Arc<PendingJobStore>,
    retry_sessions: Arc<RetrySessionManager>,
    register_contract: RegisterContractUseCase,
    config: MinedJobConfig,
}

impl MinedJobUseCase {
    #[must_use]
    pub fn new(
        chain_client: Arc<dyn ChainClient>,
        orchestration: Arc<dyn OrchestrationClient>,
        pending: Arc<PendingJobStore>,
        retry_sessions: Arc<RetrySessionManager>,
        config: MinedJobConfig,
    ) -> Self {
        let register_contract =
            RegisterContractUseCase::new(Arc::clone(&chain_client), Arc::clone(&orchestration));
        Self {
            chain_client,
            orchestration,
            pending,
            retry_sessions,
            register_contract,
            config,
        }
    }

    /// Fetch the receipt of a mined job, then finalize it
    #[instrument(skip(self, job, token), fields(job_uuid = %job.uuid, chain_uuid = %job.chain_uuid))]
    pub async fn execute(&self, job: Job, token: &CancellationToken) -> Result<(), AppError> {
        let url = self.orchestration.chain_proxy_url(&job.chain_uuid);
        let receipt = self.fetch_receipt(&job, &url, token).await?;
        self.finalize(job, receipt, &url, token).await
    }

    /// Finalize a job whose receipt is already known
    #[instrument(skip(self, job, receipt, token), fields(job_uuid = %job.uuid, chain_uuid = %job.chain_uuid))]
    pub async fn execute_with_receipt(
        &self,
        job: Job,
        receipt: Receipt,
        token: &CancellationToken,
    ) -> Result<(), AppError> {
        let url = self.orchestration.chain_proxy_url(&job.chain_uuid);
        self.finalize(job, receipt, &url, token).await
    }

    async fn finalize(
        &self,
        job: Job,
        receipt: Receipt,
        url: &str,
        token: &CancellationToken,
    ) -> Result<(), AppError> {
        let receipt = if job.job_type == JobType::EeaMarkingTransaction {
            self.merge_private_receipt(&job, receipt, url, token).await?
        } else {
            receipt
        };

        if let Some(address) = receipt.deployed_contract() {
            self.register_contract
                .execute(&job, &receipt, address, url, token)
                .await
                .map_err(|e| e.in_component("register-contract"))?;
        }

        let request = build_update(&job, receipt);
        let status = request.status.unwrap_or(JobStatus::Mined);
        with_cancel(token, self.orchestration.update_job(&job.uuid, &request))
            .await
            .map_err(|e| e.in_component("mined-job"))?;

        info!(
            job_uuid = %job.uuid,
            tx_hash = job.tx_hash().unwrap_or_default(),
            status = %status,
            "Job finalized"
        );

        self.release_lineage(&job);
        Ok(())
    }

    /// Receipt lookup with constant backoff; nodes may index receipts after blocks
    async fn fetch_receipt(
        &self,
        job: &Job,
        url: &str,
        token: &CancellationToken,
    ) -> Result<Receipt, AppError> {
        let tx_hash = job.tx_hash().ok_or_else(|| {
            AppError::Validation(ValidationError::MissingField("transaction.hash".to_string()))
        })?;

        for attempt in 0..=self.config.receipt_max_retries {
            match with_cancel(token, self.chain_client.transaction_receipt(url, tx_hash)).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => debug!(tx_hash = %tx_hash, attempt, "Receipt not available yet"),
                Err(e) if e.is_retryable() => {
                    warn!(tx_hash = %tx_hash, attempt, error = %e, "Receipt lookup failed")
                }
                Err(e) => return Err(e),
            }
            if attempt < self.config.receipt_max_retries {
                sleep(token, self.config.receipt_retry_interval).await?;
            }
        }

        Err(AppError::Blockchain(BlockchainError::Timeout(format!(
            "receipt of {} not available after {} attempts",
            tx_hash,
            self.config.receipt_max_retries + 1
        ))))
    }

    async fn merge_private_receipt(
        &self,
        job: &Job,
        mut receipt: Receipt,
        url: &str,
        token: &CancellationToken,
    ) -> Result<Receipt, AppError> {
        let tx_hash = receipt.tx_hash.clone();
        let private = with_cancel(
            token,
            self.chain_client.private_transaction_receipt(url, &tx_hash),
        )
        .await?;

        match private {
            Some(private) => {
                receipt.contract_address = private.contract_address;
                receipt.logs = private.logs;
                receipt.output = private.output;
                receipt.revert_reason = private.revert_reason;
                receipt.privacy_group_id = private
                    .privacy_group_id
                    .or_else(|| job.transaction.privacy_group_id.clone());
                receipt.status = private.status;
            }
            None => warn!(job_uuid = %job.uuid, tx_hash = %tx_hash, "Private receipt not found"),
        }
        Ok(receipt)
    }

    /// Drop every other pending job of the lineage and stop its tx-sentry
    fn release_lineage(&self, job: &Job) {
        let root = job.lineage_root();
        let mut siblings = self.pending.get_children(root);
        if let Ok(parent) = self.pending.get_by_job_uuid(root) {
            siblings.push(parent);
        }

        for sibling in siblings.iter().filter(|s| s.uuid != job.uuid) {
            match self.pending.remove(&sibling.uuid) {
                Ok(_) => debug!(job_uuid = %sibling.uuid, "Sibling removed from pending jobs"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(job_uuid = %sibling.uuid, error = %e, "Failed to remove sibling"),
            }
        }

        match self.retry_sessions.stop_session(root) {
            Ok(()) => debug!(job_uuid = %root, "Tx-sentry stopped"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(job_uuid = %root, error = %e, "Tx-sentry ended with an error"),
        }
    }
}

fn build_update(job: &Job, receipt: Receipt) -> UpdateJobRequest {
    let (status, message) = if receipt.is_success() {
        (JobStatus::Mined, format!("transaction mined in block {}", receipt.block_number))
    } else {
        let reason = receipt
            .revert_reason
            .clone()
            .unwrap_or_else(|| "execution reverted".to_string());
        (
            JobStatus::Failed,
            format!(
                "transaction failed in block {}: {}",
                receipt.block_number, reason
            ),
        )
    };

    let transaction = match (&job.transaction.transaction_type, &receipt.effective_gas_price) {
        (TransactionType::DynamicFee, Some(price)) => {
            let mut tx = job.transaction.clone();
            tx.gas_price = Some(price.clone());
            Some(tx)
        }
        _ => None,
    };

    UpdateJobRequest {
        status: Some(status),
        message: Some(message),
        transaction,
        internal_data: None,
        receipt: Some(receipt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::SentryConfig;
    use crate::app::sentry::RetryUseCase;
    use crate::domain::RECEIPT_STATUS_SUCCESS;
    use crate::store::RetrySessionStore;
    use crate::test_utils::{MockChainClient, MockOrchestrationClient};
    use std::time::Duration;
    use tokio_util::task::TaskTracker;

    struct Fixture {
        chain: Arc<MockChainClient>,
        orchestration: Arc<MockOrchestrationClient>,
        pending: Arc<PendingJobStore>,
        use_case: MinedJobUseCase,
    }

    fn fixture() -> Fixture {
        let chain = Arc::new(MockChainClient::new());
        let orchestration = Arc::new(MockOrchestrationClient::new());
        let pending = Arc::new(PendingJobStore::new());
        let retry_sessions = Arc::new(RetrySessionManager::new(
            Arc::new(RetrySessionStore::new()),
            Arc::clone(&pending),
            orchestration.clone(),
            Arc::new(RetryUseCase::new(orchestration.clone())),
            SentryConfig::default(),
            CancellationToken::new(),
            TaskTracker::new(),
        ));
        let use_case = MinedJobUseCase::new(
            chain.clone(),
            orchestration.clone(),
            Arc::clone(&pending),
            retry_sessions,
            MinedJobConfig {
                receipt_max_retries: 3,
                receipt_retry_interval: Duration::from_millis(100),
            },
        );
        Fixture {
            chain,
            orchestration,
            pending,
            use_case,
        }
    }

    fn job(uuid: &str, hash: &str) -> Job {
        let mut job = Job::new(uuid, "c1", "t", JobType::EthTransaction);
        job.status = JobStatus::Pending;
        job.transaction.hash = Some(hash.to_string());
        job.internal_data.chain_id = "1337".to_string();
        job
    }

    fn receipt(hash: &str, status: u64) -> Receipt {
        Receipt {
            tx_hash: hash.to_string(),
            block_number: 12,
            status,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_fetched_with_constant_backoff() {
        let f = fixture();
        f.orchestration.insert_job(job("j1", "0xaa"));
        f.chain.set_receipt(receipt("0xaa", RECEIPT_STATUS_SUCCESS));
        f.chain.delay_receipt("0xaa", 2);

        f.use_case
            .execute(job("j1", "0xaa"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(f.chain.receipt_calls("0xaa"), 3);
        let updates = f.orchestration.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.status, Some(JobStatus::Mined));
        assert!(updates[0].1.receipt.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_receipt_is_retryable_timeout() {
        let f = fixture();
        let err = f
            .use_case
            .execute(job("j1", "0xaa"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(f.chain.receipt_calls("0xaa"), 4);
        assert!(f.orchestration.updates().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_receipt_lookup() {
        let f = fixture();
        let token = CancellationToken::new();
        token.cancel();
        let err = f.use_case.execute(job("j1", "0xaa"), &token).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }

    #[tokio::test]
    async fn test_reverted_receipt_reports_failed() {
        let f = fixture();
        f.orchestration.insert_job(job("j1", "0xaa"));
        let mut reverted = receipt("0xaa", 0);
        reverted.revert_reason = Some("out of gas".to_string());

        f.use_case
            .execute_with_receipt(job("j1", "0xaa"), reverted, &CancellationToken::new())
            .await
            .unwrap();

        let updates = f.orchestration.updates();
        assert_eq!(updates[0].1.status, Some(JobStatus::Failed));
        assert!(updates[0].1.message.as_deref().unwrap().contains("out of gas"));
    }

    #[tokio::test]
    async fn test_dynamic_fee_reports_effective_gas_price() {
        let f = fixture();
        let mut dynamic = job("j1", "0xaa");
        dynamic.transaction.transaction_type = TransactionType::DynamicFee;
        f.orchestration.insert_job(dynamic.clone());
        let mut mined = receipt("0xaa", RECEIPT_STATUS_SUCCESS);
        mined.effective_gas_price = Some("0x3b9aca07".to_string());

        f.use_case
            .execute_with_receipt(dynamic, mined, &CancellationToken::new())
            .await
            .unwrap();

        let updates = f.orchestration.updates();
        let tx = updates[0].1.transaction.as_ref().unwrap();
        assert_eq!(tx.gas_price.as_deref(), Some("0x3b9aca07"));
    }

    #[tokio::test]
    async fn test_deployment_registers_contract() {
        let f = fixture();
        f.orchestration.insert_job(job("j1", "0xaa"));
        let address = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
        f.chain.set_code(address, vec![0xfe]);
        let mut mined = receipt("0xaa", RECEIPT_STATUS_SUCCESS);
        mined.contract_address = Some(address.to_string());

        f.use_case
            .execute_with_receipt(job("j1", "0xaa"), mined, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(f.orchestration.code_hashes().len(), 1);
    }

    #[tokio::test]
    async fn test_marking_job_merges_private_receipt() {
        let f = fixture();
        let mut marking = job("j1", "0xaa");
        marking.job_type = JobType::EeaMarkingTransaction;
        f.orchestration.insert_job(marking.clone());
        f.chain.set_private_receipt(Receipt {
            tx_hash: "0xaa".to_string(),
            status: 0,
            revert_reason: Some("private revert".to_string()),
            privacy_group_id: Some("group-1".to_string()),
            ..Default::default()
        });

        f.use_case
            .execute_with_receipt(
                marking,
                receipt("0xaa", RECEIPT_STATUS_SUCCESS),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let updates = f.orchestration.updates();
        assert_eq!(updates[0].1.status, Some(JobStatus::Failed));
        let merged = updates[0].1.receipt.as_ref().unwrap();
        assert_eq!(merged.privacy_group_id.as_deref(), Some("group-1"));
    }

    #[tokio::test]
    async fn test_mined_child_releases_lineage() {
        let f = fixture();
        let parent = job("parent", "0x01");
        let mut child = job("child", "0x02");
        child.internal_data.parent_job_uuid = Some("parent".to_string());
        let mut other = job("other", "0x03");
        other.internal_data.parent_job_uuid = Some("parent".to_string());
        f.pending.add(parent).unwrap();
        f.pending.add(child.clone()).unwrap();
        f.pending.add(other).unwrap();
        f.orchestration.insert_job(child.clone());

        f.use_case
            .execute_with_receipt(
                child,
                receipt("0x02", RECEIPT_STATUS_SUCCESS),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // The winner itself is removed by the caller
        assert_eq!(f.pending.len(), 1);
        assert!(f.pending.get_by_job_uuid("child").is_ok());
    }
}

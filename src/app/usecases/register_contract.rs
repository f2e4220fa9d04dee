//! Registration of contracts deployed by mined jobs.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::app::cancel::with_cancel;
use crate::domain::{AppError, ChainClient, CodeHashRequest, Job, OrchestrationClient, Receipt};

/// `0x`-prefixed SHA-256 of deployed bytecode
#[must_use]
pub fn code_hash(code: &[u8]) -> String {
    format!("0x{}", hex::encode(Sha256::digest(code)))
}

pub struct RegisterContractUseCase {
    chain_client: Arc<dyn ChainClient>,
    orchestration: Arc<dyn OrchestrationClient>,
}

impl RegisterContractUseCase {
    #[must_use]
    pub fn new(
        chain_client: Arc<dyn ChainClient>,
        orchestration: Arc<dyn OrchestrationClient>,
    ) -> Self {
        Self {
            chain_client,
            orchestration,
        }
    }

    /// Hash the code deployed at `address` and register it for the job's chain.
    ///
    /// EEA jobs read the code inside their privacy group. Empty code is skipped.
    #[instrument(skip(self, job, receipt, token), fields(job_uuid = %job.uuid))]
    pub async fn execute(
        &self,
        job: &Job,
        receipt: &Receipt,
        address: &str,
        url: &str,
        token: &CancellationToken,
    ) -> Result<(), AppError> {
        let privacy_group = receipt
            .privacy_group_id
            .as_deref()
            .or(job.transaction.privacy_group_id.as_deref());

        let code = match privacy_group {
            Some(group) if job.job_type.is_eea() => {
                with_cancel(token, self.chain_client.priv_code_at(url, group, address)).await?
            }
            _ => with_cancel(token, self.chain_client.code_at(url, address)).await?,
        };

        if code.is_empty() {
            debug!(address = %address, "No code at contract address, skipping registration");
            return Ok(());
        }

        let chain_id = if job.internal_data.chain_id.is_empty() {
            with_cancel(token, self.orchestration.get_chain(&job.chain_uuid))
                .await?
                .chain_id
        } else {
            job.internal_data.chain_id.clone()
        };

        let request = CodeHashRequest {
            chain_id,
            address: address.to_string(),
            code_hash: code_hash(&code),
        };
        with_cancel(
            token,
            self.orchestration.set_contract_address_code_hash(&request),
        )
        .await?;

        info!(
            address = %address,
            chain_id = %request.chain_id,
            code_hash = %request.code_hash,
            "Contract code hash registered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobType;
    use crate::test_utils::{MockChainClient, MockOrchestrationClient};

    const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

    #[test]
    fn test_code_hash_is_sha256_hex() {
        assert_eq!(
            code_hash(b""),
            "0xe3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_registers_public_contract() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_code(CONTRACT, vec![0x60, 0x80]);
        let orchestration = Arc::new(MockOrchestrationClient::new());
        let use_case = RegisterContractUseCase::new(chain.clone(), orchestration.clone());

        let mut job = Job::new("j1", "c1", "t", JobType::EthTransaction);
        job.internal_data.chain_id = "1337".to_string();

        use_case
            .execute(&job, &Receipt::default(), CONTRACT, "http://rpc", &CancellationToken::new())
            .await
            .unwrap();

        let registered = orchestration.code_hashes();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].chain_id, "1337");
        assert_eq!(registered[0].code_hash, code_hash(&[0x60, 0x80]));
    }

    #[tokio::test]
    async fn test_eea_job_reads_private_code() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_private_code("group-1", CONTRACT, vec![0x01]);
        let orchestration = Arc::new(MockOrchestrationClient::new());
        let use_case = RegisterContractUseCase::new(chain.clone(), orchestration.clone());

        let mut job = Job::new("j1", "c1", "t", JobType::EeaMarkingTransaction);
        job.internal_data.chain_id = "1337".to_string();
        let receipt = Receipt {
            privacy_group_id: Some("group-1".to_string()),
            ..Default::default()
        };

        use_case
            .execute(&job, &receipt, CONTRACT, "http://rpc", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(orchestration.code_hashes()[0].code_hash, code_hash(&[0x01]));
    }

    #[tokio::test]
    async fn test_empty_code_is_skipped() {
        let chain = Arc::new(MockChainClient::new());
        let orchestration = Arc::new(MockOrchestrationClient::new());
        let use_case = RegisterContractUseCase::new(chain, orchestration.clone());
        let job = Job::new("j1", "c1", "t", JobType::EthTransaction);

        use_case
            .execute(&job, &Receipt::default(), CONTRACT, "http://rpc", &CancellationToken::new())
            .await
            .unwrap();

        assert!(orchestration.code_hashes().is_empty());
    }
}

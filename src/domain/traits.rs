//! Domain traits defining contracts for external systems.

use async_trait::async_trait;

use super::error::AppError;
use super::ethereum::{Block, EventLog, LogFilter, Receipt};
use super::messages::Envelope;
use super::types::{
    Chain, CodeHashRequest, ContractEventLogsMessage, Job, JobFilters, Log, RetryJobTxRequest,
    UpdateJobRequest,
};

/// Chain RPC client. Every call is scoped to one chain through its proxy URL.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Head of the chain
    async fn latest_block(&self, url: &str) -> Result<Block, AppError>;

    async fn block_by_number(&self, url: &str, number: u64) -> Result<Block, AppError>;

    /// `None` while the transaction is not mined (or unknown to the node)
    async fn transaction_receipt(
        &self,
        url: &str,
        tx_hash: &str,
    ) -> Result<Option<Receipt>, AppError>;

    async fn private_transaction_receipt(
        &self,
        url: &str,
        tx_hash: &str,
    ) -> Result<Option<Receipt>, AppError>;

    async fn filter_logs(&self, url: &str, filter: &LogFilter) -> Result<Vec<EventLog>, AppError>;

    async fn code_at(&self, url: &str, address: &str) -> Result<Vec<u8>, AppError>;

    /// Code of a contract deployed inside a privacy group
    async fn priv_code_at(
        &self,
        url: &str,
        privacy_group_id: &str,
        address: &str,
    ) -> Result<Vec<u8>, AppError>;
}

/// Client of the orchestration API, the owner of jobs and chains
#[async_trait]
pub trait OrchestrationClient: Send + Sync {
    async fn get_chain(&self, chain_uuid: &str) -> Result<Chain, AppError>;

    /// URL through which RPC calls for the chain are made
    fn chain_proxy_url(&self, chain_uuid: &str) -> String;

    async fn get_job(&self, job_uuid: &str) -> Result<Job, AppError>;

    async fn search_jobs(&self, filters: &JobFilters) -> Result<Vec<Job>, AppError>;

    async fn update_job(&self, job_uuid: &str, request: &UpdateJobRequest)
    -> Result<Job, AppError>;

    /// Creates and starts a higher-fee child of a pending job
    async fn retry_job_tx(
        &self,
        job_uuid: &str,
        request: &RetryJobTxRequest,
    ) -> Result<Job, AppError>;

    /// Re-broadcasts the transaction of a pending job as is
    async fn resend_job_tx(&self, job_uuid: &str) -> Result<(), AppError>;

    async fn set_contract_address_code_hash(&self, request: &CodeHashRequest)
    -> Result<(), AppError>;
}

/// Messenger used to forward matched contract events
#[async_trait]
pub trait NotificationClient: Send + Sync {
    async fn contract_event_logs_message(
        &self,
        message: &ContractEventLogsMessage,
    ) -> Result<(), AppError>;
}

/// Outbound side of the message bus
#[async_trait]
pub trait JobEventPublisher: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> Result<(), AppError>;
}

/// One job write of an atomic batch
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub job: Job,
    /// Log row to insert; already pushed onto `job.logs`
    pub log: Option<Log>,
}

/// Persistence port for jobs, chains and contract code hashes
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Check repository connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert a job together with its initial logs
    async fn insert_job(&self, job: &Job) -> Result<(), AppError>;

    /// Fetch a job with its logs, restricted to the given tenants
    async fn find_job(&self, uuid: &str, tenants: &[String]) -> Result<Option<Job>, AppError>;

    /// Search jobs ordered by creation time
    async fn search_jobs(
        &self,
        filters: &JobFilters,
        tenants: &[String],
    ) -> Result<Vec<Job>, AppError>;

    /// Persist every update in a single transaction: all or nothing
    async fn persist_job_updates(&self, updates: &[JobUpdate]) -> Result<(), AppError>;

    async fn find_chain(&self, uuid: &str) -> Result<Option<Chain>, AppError>;

    async fn upsert_chain(&self, chain: &Chain) -> Result<(), AppError>;

    async fn upsert_code_hash(&self, request: &CodeHashRequest) -> Result<(), AppError>;
}

//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::ethereum::normalize_address;
use crate::domain::{
    AppError, Block, BlockchainError, Chain, ChainClient, CodeHashRequest,
    ContractEventLogsMessage, DatabaseError, Envelope, EventLog, ExternalServiceError, Job,
    JobEventPublisher, JobFilters, JobRepository, JobStatus, JobUpdate, Log, LogFilter,
    NotificationClient, OrchestrationClient, Receipt, RetryJobTxRequest, UpdateJobRequest,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }

    fn message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| "Mock error".to_string())
    }
}

/// Mock chain RPC client backed by in-memory blocks, receipts and code
#[derive(Default)]
pub struct MockChainClient {
    blocks: Mutex<BTreeMap<u64, Block>>,
    receipts: Mutex<HashMap<String, Receipt>>,
    private_receipts: Mutex<HashMap<String, Receipt>>,
    receipt_delays: Mutex<HashMap<String, usize>>,
    receipt_calls: Mutex<HashMap<String, usize>>,
    code: Mutex<HashMap<String, Vec<u8>>>,
    private_code: Mutex<HashMap<(String, String), Vec<u8>>>,
    logs: Mutex<Vec<EventLog>>,
    fetched_blocks: Mutex<Vec<u64>>,
    latest_block_calls: AtomicUsize,
    latest_block_failure: Mutex<Option<String>>,
}

impl MockChainClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block; the head is the highest pushed block
    pub fn push_block(&self, block: Block) {
        self.blocks.lock().unwrap().insert(block.number, block);
    }

    pub fn set_receipt(&self, receipt: Receipt) {
        self.receipts
            .lock()
            .unwrap()
            .insert(receipt.tx_hash.to_lowercase(), receipt);
    }

    /// Answer `None` for the next `misses` receipt lookups of `tx_hash`
    pub fn delay_receipt(&self, tx_hash: &str, misses: usize) {
        self.receipt_delays
            .lock()
            .unwrap()
            .insert(tx_hash.to_lowercase(), misses);
    }

    pub fn set_private_receipt(&self, receipt: Receipt) {
        self.private_receipts
            .lock()
            .unwrap()
            .insert(receipt.tx_hash.to_lowercase(), receipt);
    }

    pub fn set_code(&self, address: &str, code: Vec<u8>) {
        self.code
            .lock()
            .unwrap()
            .insert(normalize_address(address), code);
    }

    pub fn set_private_code(&self, privacy_group_id: &str, address: &str, code: Vec<u8>) {
        self.private_code.lock().unwrap().insert(
            (privacy_group_id.to_string(), normalize_address(address)),
            code,
        );
    }

    pub fn add_log(&self, log: EventLog) {
        self.logs.lock().unwrap().push(log);
    }

    /// Make every `latest_block` call fail with a non-transient RPC error
    pub fn fail_latest_block(&self, message: impl Into<String>) {
        *self.latest_block_failure.lock().unwrap() = Some(message.into());
    }

    pub fn receipt_calls(&self, tx_hash: &str) -> usize {
        self.receipt_calls
            .lock()
            .unwrap()
            .get(&tx_hash.to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    /// Block numbers requested through `block_by_number`, in call order
    pub fn fetched_blocks(&self) -> Vec<u64> {
        self.fetched_blocks.lock().unwrap().clone()
    }

    pub fn latest_block_calls(&self) -> usize {
        self.latest_block_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn latest_block(&self, _url: &str) -> Result<Block, AppError> {
        self.latest_block_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.latest_block_failure.lock().unwrap().clone() {
            return Err(AppError::Blockchain(BlockchainError::RpcError(message)));
        }
        self.blocks
            .lock()
            .unwrap()
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| AppError::Blockchain(BlockchainError::Connection("no blocks".to_string())))
    }

    async fn block_by_number(&self, _url: &str, number: u64) -> Result<Block, AppError> {
        self.fetched_blocks.lock().unwrap().push(number);
        self.blocks
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| {
                AppError::Blockchain(BlockchainError::Connection(format!(
                    "block {} not available",
                    number
                )))
            })
    }

    async fn transaction_receipt(
        &self,
        _url: &str,
        tx_hash: &str,
    ) -> Result<Option<Receipt>, AppError> {
        let key = tx_hash.to_lowercase();
        *self.receipt_calls.lock().unwrap().entry(key.clone()).or_default() += 1;

        if let Some(misses) = self.receipt_delays.lock().unwrap().get_mut(&key)
            && *misses > 0
        {
            *misses -= 1;
            return Ok(None);
        }
        Ok(self.receipts.lock().unwrap().get(&key).cloned())
    }

    async fn private_transaction_receipt(
        &self,
        _url: &str,
        tx_hash: &str,
    ) -> Result<Option<Receipt>, AppError> {
        Ok(self
            .private_receipts
            .lock()
            .unwrap()
            .get(&tx_hash.to_lowercase())
            .cloned())
    }

    async fn filter_logs(&self, _url: &str, filter: &LogFilter) -> Result<Vec<EventLog>, AppError> {
        let addresses: Vec<String> = filter.addresses.iter().map(|a| normalize_address(a)).collect();
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                addresses.contains(&normalize_address(&log.address))
                    && (filter.from_block..=filter.to_block).contains(&log.block_number)
            })
            .cloned()
            .collect())
    }

    async fn code_at(&self, _url: &str, address: &str) -> Result<Vec<u8>, AppError> {
        Ok(self
            .code
            .lock()
            .unwrap()
            .get(&normalize_address(address))
            .cloned()
            .unwrap_or_default())
    }

    async fn priv_code_at(
        &self,
        _url: &str,
        privacy_group_id: &str,
        address: &str,
    ) -> Result<Vec<u8>, AppError> {
        Ok(self
            .private_code
            .lock()
            .unwrap()
            .get(&(privacy_group_id.to_string(), normalize_address(address)))
            .cloned()
            .unwrap_or_default())
    }
}

/// Mock orchestration API: keeps jobs and chains in memory and records every call
#[derive(Default)]
pub struct MockOrchestrationClient {
    jobs: Mutex<Vec<Job>>,
    chains: Mutex<HashMap<String, Chain>>,
    updates: Mutex<Vec<(String, UpdateJobRequest)>>,
    retries: Mutex<Vec<(String, RetryJobTxRequest)>>,
    resends: Mutex<Vec<String>>,
    code_hashes: Mutex<Vec<CodeHashRequest>>,
    get_chain_calls: AtomicUsize,
    search_failure: Mutex<Option<String>>,
}

impl MockOrchestrationClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job
    pub fn insert_job(&self, job: Job) {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter_mut().find(|j| j.uuid == job.uuid) {
            Some(existing) => *existing = job,
            None => jobs.push(job),
        }
    }

    pub fn insert_chain(&self, chain: Chain) {
        self.chains.lock().unwrap().insert(chain.uuid.clone(), chain);
    }

    /// Make `search_jobs` fail with a transient error
    pub fn fail_searches(&self, message: impl Into<String>) {
        *self.search_failure.lock().unwrap() = Some(message.into());
    }

    pub fn job(&self, uuid: &str) -> Option<Job> {
        self.jobs.lock().unwrap().iter().find(|j| j.uuid == uuid).cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(String, UpdateJobRequest)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn retries(&self) -> Vec<(String, RetryJobTxRequest)> {
        self.retries.lock().unwrap().clone()
    }

    pub fn resends(&self) -> Vec<String> {
        self.resends.lock().unwrap().clone()
    }

    pub fn code_hashes(&self) -> Vec<CodeHashRequest> {
        self.code_hashes.lock().unwrap().clone()
    }

    pub fn get_chain_calls(&self) -> usize {
        self.get_chain_calls.load(Ordering::SeqCst)
    }

    fn not_found(uuid: &str) -> AppError {
        AppError::NotFound(format!("job {} not found", uuid))
    }
}

#[async_trait]
impl OrchestrationClient for MockOrchestrationClient {
    async fn get_chain(&self, chain_uuid: &str) -> Result<Chain, AppError> {
        self.get_chain_calls.fetch_add(1, Ordering::SeqCst);
        self.chains
            .lock()
            .unwrap()
            .get(chain_uuid)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("chain {} not found", chain_uuid)))
    }

    fn chain_proxy_url(&self, chain_uuid: &str) -> String {
        format!("http://proxy/{}", chain_uuid)
    }

    async fn get_job(&self, job_uuid: &str) -> Result<Job, AppError> {
        self.job(job_uuid).ok_or_else(|| Self::not_found(job_uuid))
    }

    async fn search_jobs(&self, filters: &JobFilters) -> Result<Vec<Job>, AppError> {
        if let Some(message) = self.search_failure.lock().unwrap().clone() {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                message,
            )));
        }
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| filters.matches(j))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn update_job(
        &self,
        job_uuid: &str,
        request: &UpdateJobRequest,
    ) -> Result<Job, AppError> {
        self.updates
            .lock()
            .unwrap()
            .push((job_uuid.to_string(), request.clone()));

        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.uuid == job_uuid)
            .ok_or_else(|| Self::not_found(job_uuid))?;
        if let Some(status) = request.status {
            if !status.is_annotation() {
                job.status = status;
            }
            job.logs
                .push(Log::new(status, request.message.clone().unwrap_or_default()));
        }
        if let Some(transaction) = &request.transaction {
            job.transaction = transaction.clone();
        }
        if let Some(internal_data) = &request.internal_data {
            job.internal_data = internal_data.clone();
        }
        if let Some(receipt) = &request.receipt {
            job.receipt = Some(receipt.clone());
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn retry_job_tx(
        &self,
        job_uuid: &str,
        request: &RetryJobTxRequest,
    ) -> Result<Job, AppError> {
        self.retries
            .lock()
            .unwrap()
            .push((job_uuid.to_string(), request.clone()));

        let mut jobs = self.jobs.lock().unwrap();
        let parent = jobs
            .iter()
            .find(|j| j.uuid == job_uuid)
            .cloned()
            .ok_or_else(|| Self::not_found(job_uuid))?;

        let mut child = parent.clone();
        child.uuid = Uuid::new_v4().to_string();
        child.status = JobStatus::Pending;
        child.transaction.hash = Some(format!("0x{}", Uuid::new_v4().simple()));
        child.internal_data.parent_job_uuid = Some(parent.lineage_root().to_string());
        child.internal_data.has_been_retried = false;
        child.logs = vec![Log::new(JobStatus::Pending, "retry")];
        child.created_at = Utc::now();
        child.updated_at = child.created_at;
        jobs.push(child.clone());
        Ok(child)
    }

    async fn resend_job_tx(&self, job_uuid: &str) -> Result<(), AppError> {
        self.resends.lock().unwrap().push(job_uuid.to_string());

        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.uuid == job_uuid)
            .ok_or_else(|| Self::not_found(job_uuid))?;
        job.logs.push(Log::new(JobStatus::Resending, "resent"));
        Ok(())
    }

    async fn set_contract_address_code_hash(
        &self,
        request: &CodeHashRequest,
    ) -> Result<(), AppError> {
        self.code_hashes.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Mock messenger recording forwarded contract events
#[derive(Default)]
pub struct MockNotificationClient {
    messages: Mutex<Vec<ContractEventLogsMessage>>,
    config: MockConfig,
}

impl MockNotificationClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            config: MockConfig::failure(message),
        }
    }

    pub fn messages(&self) -> Vec<ContractEventLogsMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationClient for MockNotificationClient {
    async fn contract_event_logs_message(
        &self,
        message: &ContractEventLogsMessage,
    ) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                self.config.message(),
            )));
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// In-memory job repository with all-or-nothing batch writes
pub struct InMemoryJobRepository {
    jobs: Mutex<Vec<Job>>,
    chains: Mutex<HashMap<String, Chain>>,
    code_hashes: Mutex<Vec<CodeHashRequest>>,
    config: MockConfig,
    is_healthy: AtomicBool,
    fail_next_persist: AtomicBool,
}

impl InMemoryJobRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            chains: Mutex::new(HashMap::new()),
            code_hashes: Mutex::new(Vec::new()),
            config,
            is_healthy: AtomicBool::new(true),
            fail_next_persist: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Make the next `persist_job_updates` call fail without writing anything
    pub fn fail_next_persist(&self) {
        self.fail_next_persist.store(true, Ordering::SeqCst);
    }

    pub fn insert_chain(&self, chain: Chain) {
        self.chains.lock().unwrap().insert(chain.uuid.clone(), chain);
    }

    /// Get all stored jobs (for testing)
    pub fn get_all_jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn code_hashes(&self) -> Vec<CodeHashRequest> {
        self.code_hashes.lock().unwrap().clone()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Database(DatabaseError::Query(self.config.message())));
        }
        Ok(())
    }
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn insert_job(&self, job: &Job) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.iter().any(|j| j.uuid == job.uuid) {
            return Err(AppError::Database(DatabaseError::Duplicate(job.uuid.clone())));
        }
        jobs.push(job.clone());
        Ok(())
    }

    async fn find_job(&self, uuid: &str, tenants: &[String]) -> Result<Option<Job>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.uuid == uuid && j.belongs_to(tenants))
            .cloned())
    }

    async fn search_jobs(
        &self,
        filters: &JobFilters,
        tenants: &[String],
    ) -> Result<Vec<Job>, AppError> {
        self.check_should_fail()?;
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.belongs_to(tenants) && filters.matches(j))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn persist_job_updates(&self, updates: &[JobUpdate]) -> Result<(), AppError> {
        self.check_should_fail()?;
        if self.fail_next_persist.swap(false, Ordering::SeqCst) {
            return Err(AppError::Database(DatabaseError::Query(
                "transaction aborted".to_string(),
            )));
        }

        let mut jobs = self.jobs.lock().unwrap();
        let mut positions = Vec::with_capacity(updates.len());
        for update in updates {
            let position = jobs
                .iter()
                .position(|j| j.uuid == update.job.uuid)
                .ok_or_else(|| AppError::Database(DatabaseError::NotFound(update.job.uuid.clone())))?;
            positions.push(position);
        }
        for (position, update) in positions.into_iter().zip(updates) {
            jobs[position] = update.job.clone();
        }
        Ok(())
    }

    async fn find_chain(&self, uuid: &str) -> Result<Option<Chain>, AppError> {
        self.check_should_fail()?;
        Ok(self.chains.lock().unwrap().get(uuid).cloned())
    }

    async fn upsert_chain(&self, chain: &Chain) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.insert_chain(chain.clone());
        Ok(())
    }

    async fn upsert_code_hash(&self, request: &CodeHashRequest) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut hashes = self.code_hashes.lock().unwrap();
        hashes.retain(|h| !(h.chain_id == request.chain_id && h.address == request.address));
        hashes.push(request.clone());
        Ok(())
    }
}

/// Publisher that keeps every envelope instead of sending it
#[derive(Default)]
pub struct RecordingPublisher {
    envelopes: Mutex<Vec<Envelope>>,
}

impl RecordingPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobEventPublisher for RecordingPublisher {
    async fn publish(&self, envelope: Envelope) -> Result<(), AppError> {
        self.envelopes.lock().unwrap().push(envelope);
        Ok(())
    }
}

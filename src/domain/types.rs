//! Domain types with validation support.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;
use validator::Validate;

use super::ethereum::{EventLog, Receipt};

/// Tenant scope granting access to every tenant
pub const WILDCARD_TENANT: &str = "*";

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job persisted, not yet started
    #[default]
    Created,
    /// Handed to the sender, transaction not yet broadcast
    Started,
    /// Transaction broadcast, awaiting inclusion
    Pending,
    /// Transaction re-broadcast (annotation)
    Resending,
    /// Non-fatal problem recorded (annotation)
    Warning,
    /// Sender is recovering the transaction (annotation)
    Recovering,
    /// Transaction included in a block
    Mined,
    /// Job failed permanently
    Failed,
    /// Private payload stored without a public transaction
    Stored,
    /// A sibling job was mined instead
    NeverMined,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Started => "STARTED",
            Self::Pending => "PENDING",
            Self::Resending => "RESENDING",
            Self::Warning => "WARNING",
            Self::Recovering => "RECOVERING",
            Self::Mined => "MINED",
            Self::Failed => "FAILED",
            Self::Stored => "STORED",
            Self::NeverMined => "NEVER_MINED",
        }
    }

    /// Statuses that only append a log and never overwrite `Job::status`
    #[must_use]
    pub fn is_annotation(&self) -> bool {
        matches!(self, Self::Resending | Self::Warning | Self::Recovering)
    }

    /// Terminal statuses: the job can no longer be updated
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Mined | Self::Failed | Self::Stored | Self::NeverMined
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "STARTED" => Ok(Self::Started),
            "PENDING" => Ok(Self::Pending),
            "RESENDING" => Ok(Self::Resending),
            "WARNING" => Ok(Self::Warning),
            "RECOVERING" => Ok(Self::Recovering),
            "MINED" => Ok(Self::Mined),
            "FAILED" => Ok(Self::Failed),
            "STORED" => Ok(Self::Stored),
            "NEVER_MINED" => Ok(Self::NeverMined),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of transaction a job carries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[default]
    EthTransaction,
    EthRawTransaction,
    EeaPrivateTransaction,
    EeaMarkingTransaction,
    TesseraPrivateTransaction,
    TesseraMarkingTransaction,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EthTransaction => "eth_transaction",
            Self::EthRawTransaction => "eth_raw_transaction",
            Self::EeaPrivateTransaction => "eea_private_transaction",
            Self::EeaMarkingTransaction => "eea_marking_transaction",
            Self::TesseraPrivateTransaction => "tessera_private_transaction",
            Self::TesseraMarkingTransaction => "tessera_marking_transaction",
        }
    }

    /// EEA jobs read receipts and code through the private RPC namespace
    #[must_use]
    pub fn is_eea(&self) -> bool {
        matches!(
            self,
            Self::EeaPrivateTransaction | Self::EeaMarkingTransaction
        )
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eth_transaction" => Ok(Self::EthTransaction),
            "eth_raw_transaction" => Ok(Self::EthRawTransaction),
            "eea_private_transaction" => Ok(Self::EeaPrivateTransaction),
            "eea_marking_transaction" => Ok(Self::EeaMarkingTransaction),
            "tessera_private_transaction" => Ok(Self::TesseraPrivateTransaction),
            "tessera_marking_transaction" => Ok(Self::TesseraMarkingTransaction),
            _ => Err(format!("Invalid job type: {}", s)),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fee model of a transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    #[default]
    Legacy,
    DynamicFee,
}

/// Ethereum transaction carried by a job. Quantities are `0x` hex strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, ToSchema)]
#[serde(default)]
pub struct Transaction {
    #[schema(example = "0x6f1a3c8a0b1e8e3f7c1d2e4b5a69788c1d2e3f4a5b6c7d8e9f0a1b2c3d4e5f60")]
    pub hash: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub nonce: Option<String>,
    pub value: Option<String>,
    pub gas: Option<String>,
    #[schema(example = "0x3b9aca00")]
    pub gas_price: Option<String>,
    #[schema(example = "0x2540be400")]
    pub gas_fee_cap: Option<String>,
    pub gas_tip_cap: Option<String>,
    pub data: Option<String>,
    pub raw: Option<String>,
    pub transaction_type: TransactionType,
    pub privacy_group_id: Option<String>,
    pub private_from: Option<String>,
    pub private_for: Vec<String>,
}

/// Orchestration metadata that never reaches the chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, ToSchema)]
#[serde(default)]
pub struct InternalData {
    #[schema(example = "1337")]
    pub chain_id: String,
    pub parent_job_uuid: Option<String>,
    /// Tx-sentry tick period in milliseconds; 0 disables retries
    pub retry_interval_ms: u64,
    /// Relative gas bump applied per retry (0.1 = +10%); 0 means resend only
    pub gas_price_increment: f64,
    /// Cap on the cumulative increment; 0 means uncapped
    pub gas_price_limit: f64,
    pub has_been_retried: bool,
    /// Private transaction manager storage key
    pub store_id: Option<String>,
}

impl InternalData {
    #[must_use]
    pub fn retry_interval(&self) -> Option<Duration> {
        (self.retry_interval_ms > 0).then(|| Duration::from_millis(self.retry_interval_ms))
    }
}

/// Immutable status-change record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Log {
    pub status: JobStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Log {
    #[must_use]
    pub fn new(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// One transaction submission attempt tracked from creation to terminal status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Job {
    #[schema(example = "0190a3b2-7c4d-7e8f-9a0b-1c2d3e4f5a6b")]
    pub uuid: String,
    pub schedule_uuid: Option<String>,
    pub chain_uuid: String,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    #[serde(default)]
    pub transaction: Transaction,
    #[serde(default)]
    pub internal_data: InternalData,
    #[serde(default)]
    pub receipt: Option<Receipt>,
    #[serde(default)]
    pub next_job_uuid: Option<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    #[must_use]
    pub fn new(
        uuid: impl Into<String>,
        chain_uuid: impl Into<String>,
        tenant_id: impl Into<String>,
        job_type: JobType,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: uuid.into(),
            schedule_uuid: None,
            chain_uuid: chain_uuid.into(),
            tenant_id: tenant_id.into(),
            job_type,
            status: JobStatus::Created,
            transaction: Transaction::default(),
            internal_data: InternalData::default(),
            receipt: None,
            next_job_uuid: None,
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn tx_hash(&self) -> Option<&str> {
        self.transaction.hash.as_deref().filter(|h| !h.is_empty())
    }

    /// Retries are driven from the root of a lineage only
    #[must_use]
    pub fn should_be_retried(&self) -> bool {
        self.internal_data.retry_interval_ms > 0
            && self.internal_data.parent_job_uuid.is_none()
            && !self.internal_data.has_been_retried
    }

    /// Key shared by every job of one retry lineage
    #[must_use]
    pub fn lineage_root(&self) -> &str {
        self.internal_data
            .parent_job_uuid
            .as_deref()
            .unwrap_or(&self.uuid)
    }

    #[must_use]
    pub fn last_log(&self) -> Option<&Log> {
        self.logs.last()
    }

    #[must_use]
    pub fn belongs_to(&self, tenants: &[String]) -> bool {
        tenants
            .iter()
            .any(|t| t == WILDCARD_TENANT || *t == self.tenant_id)
    }
}

/// Chain metadata needed to observe it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Chain {
    pub uuid: String,
    pub name: String,
    #[schema(example = "1337")]
    pub chain_id: String,
    pub urls: Vec<String>,
    /// Listener polling period in milliseconds
    #[serde(default)]
    pub listener_block_time_ms: u64,
    #[serde(default)]
    pub tenant_id: String,
}

impl Chain {
    #[must_use]
    pub fn block_time(&self) -> Option<Duration> {
        (self.listener_block_time_ms > 0).then(|| Duration::from_millis(self.listener_block_time_ms))
    }
}

/// Registration of interest in the events of a contract
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Subscription {
    pub uuid: String,
    pub chain_uuid: String,
    pub contract_address: String,
    #[serde(default)]
    pub from_block: Option<u64>,
    #[serde(default)]
    pub tenant_id: String,
}

/// Filters for job searches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilters {
    pub tx_hashes: Vec<String>,
    pub chain_uuid: Option<String>,
    pub status: Option<JobStatus>,
    /// Matches the parent itself and every job whose parent it is
    pub parent_job_uuid: Option<String>,
    pub only_parents: bool,
}

impl JobFilters {
    #[must_use]
    pub fn matches(&self, job: &Job) -> bool {
        if !self.tx_hashes.is_empty()
            && !job
                .tx_hash()
                .is_some_and(|h| self.tx_hashes.iter().any(|t| t == h))
        {
            return false;
        }
        if let Some(chain_uuid) = &self.chain_uuid
            && &job.chain_uuid != chain_uuid
        {
            return false;
        }
        if let Some(status) = self.status
            && job.status != status
        {
            return false;
        }
        if let Some(parent) = &self.parent_job_uuid
            && &job.uuid != parent
            && job.internal_data.parent_job_uuid.as_ref() != Some(parent)
        {
            return false;
        }
        if self.only_parents && job.internal_data.parent_job_uuid.is_some() {
            return false;
        }
        true
    }
}

/// Request to create a new job
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub schedule_uuid: Option<String>,
    #[validate(length(min = 1, message = "Chain UUID is required"))]
    pub chain_uuid: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub transaction: Transaction,
    #[serde(default)]
    pub internal_data: InternalData,
}

/// Partial job update
#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
#[serde(default)]
pub struct UpdateJobRequest {
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub transaction: Option<Transaction>,
    pub internal_data: Option<InternalData>,
    pub receipt: Option<Receipt>,
}

impl UpdateJobRequest {
    #[must_use]
    pub fn status(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Request to replace a pending transaction with a higher-fee child
#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate, ToSchema)]
pub struct RetryJobTxRequest {
    /// Relative increment applied to gas price or fee cap
    #[validate(range(min = 0.0, max = 10.0, message = "Gas increment must be between 0 and 10"))]
    #[schema(example = 0.1)]
    pub gas_increment: f64,
    /// Replacement call data
    #[serde(default)]
    pub data: Option<String>,
}

/// Code hash registration for a deployed contract
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct CodeHashRequest {
    pub chain_id: String,
    pub address: String,
    pub code_hash: String,
}

/// Matched contract events forwarded to subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ContractEventLogsMessage {
    pub chain_uuid: String,
    pub chain_id: String,
    pub subscription_uuid: String,
    pub tenant_id: String,
    pub logs: Vec<EventLog>,
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Job repository health status
    pub database: HealthStatus,
    /// Number of chains currently observed
    pub chain_sessions: usize,
    /// Number of live tx-sentry sessions
    pub retry_sessions: usize,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, chain_sessions: usize, retry_sessions: usize) -> Self {
        Self {
            status: database,
            database,
            chain_sessions,
            retry_sessions,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "invalid_state")]
    pub r#type: String,
    /// Human-readable error message
    #[schema(example = "job 0190a3b2 is not PENDING")]
    pub message: String,
}

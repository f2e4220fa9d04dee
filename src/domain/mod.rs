//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod ethereum;
pub mod messages;
pub mod traits;
pub mod types;

pub use error::{
    AppError, BlockchainError, ConfigError, DatabaseError, ExternalServiceError, ValidationError,
};
pub use ethereum::{
    Block, EventLog, LogFilter, RECEIPT_STATUS_SUCCESS, Receipt, ZERO_ADDRESS, normalize_address,
};
pub use messages::{
    Envelope, MessagePayload, PENDING_JOB_TOPIC, SUBSCRIPTION_TOPIC, SubscriptionAction,
    SubscriptionEvent,
};
pub use traits::{
    ChainClient, JobEventPublisher, JobRepository, JobUpdate, NotificationClient,
    OrchestrationClient,
};
pub use types::{
    Chain, CodeHashRequest, ContractEventLogsMessage, CreateJobRequest, ErrorDetail,
    ErrorResponse, HealthResponse, HealthStatus, InternalData, Job, JobFilters, JobStatus, JobType,
    Log, RetryJobTxRequest, Subscription, Transaction, TransactionType, UpdateJobRequest,
    WILDCARD_TENANT,
};

//! Use-cases driven by the listener sessions and inbound messages.

pub mod contract_events;
pub mod mined_job;
pub mod pending_job;
pub mod register_contract;
pub mod subscriptions;

pub use contract_events::ContractEventsUseCase;
pub use mined_job::MinedJobUseCase;
pub use pending_job::{PendingJobOutcome, PendingJobUseCase};
pub use register_contract::{RegisterContractUseCase, code_hash};
pub use subscriptions::SubscriptionUseCase;

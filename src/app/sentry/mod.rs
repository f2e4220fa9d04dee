//! Tx-sentry: per-job retry sessions and their manager.

pub mod manager;
pub mod retry;
pub mod session;

pub use manager::RetrySessionManager;
pub use retry::RetryUseCase;
pub use session::{RetryJobSession, RetryProgress};

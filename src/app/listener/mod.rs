//! Chain listener: per-chain block polling sessions and their manager.

pub mod manager;
pub mod session;

pub use manager::ChainSessionManager;
pub use session::ChainListenerSession;

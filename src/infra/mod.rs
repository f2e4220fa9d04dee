//! Infrastructure layer implementations.

pub mod blockchain;
pub mod bus;
pub mod database;
pub mod notifier;
pub mod orchestration;

pub use blockchain::{EthRpcClient, RpcClientConfig};
pub use bus::{ChannelPublisher, channel};
pub use database::{PostgresClient, PostgresConfig};
pub use notifier::WebhookNotifier;
pub use orchestration::{HttpOrchestrationClient, LocalOrchestrationClient, OrchestrationConfig};

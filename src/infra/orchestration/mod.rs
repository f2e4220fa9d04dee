//! Orchestration API clients.

pub mod http;
pub mod local;

pub use http::{HttpOrchestrationClient, OrchestrationConfig, TENANT_HEADER};
pub use local::LocalOrchestrationClient;

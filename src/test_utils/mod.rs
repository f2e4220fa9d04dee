//! Test doubles shared by unit and integration tests.

pub mod mocks;

pub use mocks::{
    InMemoryJobRepository, MockChainClient, MockConfig, MockNotificationClient,
    MockOrchestrationClient, RecordingPublisher,
};

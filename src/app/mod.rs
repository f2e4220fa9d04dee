//! Application layer: job lifecycle, listener and tx-sentry sessions, and shared state.

pub mod cancel;
pub mod config;
pub mod consumer;
pub mod jobs;
pub mod listener;
pub mod sentry;
pub mod state;
pub mod tx_listener;
pub mod usecases;

pub use config::{ConsumerConfig, ListenerConfig, MinedJobConfig, SentryConfig, TxListenerConfig};
pub use consumer::MessageConsumer;
pub use jobs::JobService;
pub use state::AppState;
pub use tx_listener::TxListener;

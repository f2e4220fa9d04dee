//! Message bus adapters.

pub mod channel;

pub use channel::{ChannelPublisher, channel};

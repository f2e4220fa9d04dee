//! In-memory state stores backing the listener and tx-sentry sessions.
//!
//! Each store owns a single `RwLock` guarding its primary map and every
//! secondary index, so an insert or removal is visible atomically across
//! all indices. No lock ever spans two stores.

pub mod chains;
pub mod messages;
pub mod pending_jobs;
pub mod retry_sessions;
pub mod subscriptions;

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use chains::ChainStore;
pub use messages::{Message, MessageStore};
pub use pending_jobs::PendingJobStore;
pub use retry_sessions::{RetrySession, RetrySessionStore};
pub use subscriptions::SubscriptionStore;

/// Store operations never panic while holding a lock, so a poisoned lock
/// still guards consistent data.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

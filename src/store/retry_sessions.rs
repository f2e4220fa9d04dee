//! Live tx-sentry sessions, at most one per job.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tokio_util::sync::CancellationToken;

use crate::domain::{AppError, Job};

use super::{read, write};

/// Handle on a running retry session
#[derive(Debug, Clone)]
pub struct RetrySession {
    pub job: Job,
    /// Distinguishes successive sessions of the same job
    pub session_id: u64,
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, RetrySession>,
    by_tx_hash: HashMap<String, String>,
    by_chain: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn unindex(&mut self, session: &RetrySession) {
        if let Some(hash) = session.job.tx_hash() {
            let key = hash.to_lowercase();
            if self.by_tx_hash.get(&key) == Some(&session.job.uuid) {
                self.by_tx_hash.remove(&key);
            }
        }
        if let Some(uuids) = self.by_chain.get_mut(&session.job.chain_uuid) {
            uuids.remove(&session.job.uuid);
            if uuids.is_empty() {
                self.by_chain.remove(&session.job.chain_uuid);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct RetrySessionStore {
    inner: RwLock<Inner>,
}

impl RetrySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: RetrySession) -> Result<(), AppError> {
        let mut inner = write(&self.inner);
        let uuid = session.job.uuid.clone();
        if inner.sessions.contains_key(&uuid) {
            return Err(AppError::AlreadyExists(format!(
                "retry session for job {} already exists",
                uuid
            )));
        }
        if let Some(hash) = session.job.tx_hash() {
            inner.by_tx_hash.insert(hash.to_lowercase(), uuid.clone());
        }
        inner
            .by_chain
            .entry(session.job.chain_uuid.clone())
            .or_default()
            .insert(uuid.clone());
        inner.sessions.insert(uuid, session);
        Ok(())
    }

    pub fn get_by_job_uuid(&self, uuid: &str) -> Result<RetrySession, AppError> {
        read(&self.inner)
            .sessions
            .get(uuid)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no retry session for job {}", uuid)))
    }

    pub fn get_by_tx_hash(&self, tx_hash: &str) -> Result<RetrySession, AppError> {
        let inner = read(&self.inner);
        inner
            .by_tx_hash
            .get(&tx_hash.to_lowercase())
            .and_then(|uuid| inner.sessions.get(uuid))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("no retry session for transaction {}", tx_hash))
            })
    }

    #[must_use]
    pub fn list_per_chain_uuid(&self, chain_uuid: &str) -> Vec<RetrySession> {
        let inner = read(&self.inner);
        inner
            .by_chain
            .get(chain_uuid)
            .map(|uuids| {
                uuids
                    .iter()
                    .filter_map(|uuid| inner.sessions.get(uuid).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remove(&self, uuid: &str) -> Result<RetrySession, AppError> {
        let mut inner = write(&self.inner);
        let session = inner
            .sessions
            .remove(uuid)
            .ok_or_else(|| AppError::NotFound(format!("no retry session for job {}", uuid)))?;
        inner.unindex(&session);
        Ok(session)
    }

    /// Remove the entry only if it still belongs to `session_id`.
    ///
    /// An exiting session must not evict a newer session of the same job.
    pub fn remove_session(&self, uuid: &str, session_id: u64) -> bool {
        let mut inner = write(&self.inner);
        match inner.sessions.get(uuid) {
            Some(session) if session.session_id == session_id => {}
            _ => return false,
        }
        match inner.sessions.remove(uuid) {
            Some(session) => {
                inner.unindex(&session);
                true
            }
            None => false,
        }
    }

    /// Drop every session of a chain, returning them so the caller can cancel
    pub fn delete_per_chain_uuid(&self, chain_uuid: &str) -> Vec<RetrySession> {
        let mut inner = write(&self.inner);
        let uuids: Vec<String> = inner
            .by_chain
            .get(chain_uuid)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut removed = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            if let Some(session) = inner.sessions.remove(&uuid) {
                inner.unindex(&session);
                removed.push(session);
            }
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.inner).sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.inner).sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobType;

    fn session(uuid: &str, chain: &str, hash: &str, session_id: u64) -> RetrySession {
        let mut job = Job::new(uuid, chain, "tenant", JobType::EthTransaction);
        job.transaction.hash = Some(hash.to_string());
        RetrySession {
            job,
            session_id,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_one_session_per_job() {
        let store = RetrySessionStore::new();
        store.add(session("j1", "c1", "0xaa", 1)).unwrap();
        assert!(
            store
                .add(session("j1", "c1", "0xbb", 2))
                .unwrap_err()
                .is_already_exists()
        );
        assert_eq!(store.get_by_tx_hash("0xAA").unwrap().job.uuid, "j1");
        assert_eq!(store.list_per_chain_uuid("c1").len(), 1);
    }

    #[test]
    fn test_remove_session_ignores_stale_id() {
        let store = RetrySessionStore::new();
        store.add(session("j1", "c1", "0xaa", 7)).unwrap();

        assert!(!store.remove_session("j1", 6));
        assert_eq!(store.len(), 1);
        assert!(store.remove_session("j1", 7));
        assert!(store.is_empty());
        assert!(store.get_by_tx_hash("0xaa").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_per_chain() {
        let store = RetrySessionStore::new();
        store.add(session("j1", "c1", "0xaa", 1)).unwrap();
        store.add(session("j2", "c1", "0xbb", 2)).unwrap();
        store.add(session("j3", "c2", "0xcc", 3)).unwrap();

        let removed = store.delete_per_chain_uuid("c1");
        assert_eq!(removed.len(), 2);
        assert!(store.list_per_chain_uuid("c1").is_empty());
        assert_eq!(store.len(), 1);
        assert!(store.remove("j1").unwrap_err().is_not_found());
    }
}

//! Jobs whose transaction is broadcast and awaits inclusion.
//!
//! Indexed by job UUID, by `(chain, tx hash)`, by parent job and by chain.
//! A transaction hash maps to at most one pending job per chain.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::domain::{AppError, Job, ValidationError};

use super::{read, write};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    by_tx_hash: HashMap<(String, String), String>,
    by_parent: HashMap<String, Vec<String>>,
    by_chain: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn index(&mut self, job: &Job, tx_key: (String, String)) {
        self.by_tx_hash.insert(tx_key, job.uuid.clone());
        if let Some(parent) = &job.internal_data.parent_job_uuid {
            self.by_parent
                .entry(parent.clone())
                .or_default()
                .push(job.uuid.clone());
        }
        self.by_chain
            .entry(job.chain_uuid.clone())
            .or_default()
            .insert(job.uuid.clone());
    }

    fn unindex(&mut self, job: &Job) {
        if let Ok(key) = tx_key(job) {
            self.by_tx_hash.remove(&key);
        }
        if let Some(parent) = &job.internal_data.parent_job_uuid
            && let Some(children) = self.by_parent.get_mut(parent)
        {
            children.retain(|uuid| uuid != &job.uuid);
            if children.is_empty() {
                self.by_parent.remove(parent);
            }
        }
        if let Some(uuids) = self.by_chain.get_mut(&job.chain_uuid) {
            uuids.remove(&job.uuid);
            if uuids.is_empty() {
                self.by_chain.remove(&job.chain_uuid);
            }
        }
    }
}

fn tx_key(job: &Job) -> Result<(String, String), AppError> {
    let hash = job.tx_hash().ok_or_else(|| {
        AppError::Validation(ValidationError::MissingField(format!(
            "transaction.hash of job {}",
            job.uuid
        )))
    })?;
    Ok((job.chain_uuid.clone(), hash.to_lowercase()))
}

#[derive(Debug, Default)]
pub struct PendingJobStore {
    inner: RwLock<Inner>,
}

impl PendingJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, job: Job) -> Result<(), AppError> {
        let key = tx_key(&job)?;
        let mut inner = write(&self.inner);
        if inner.jobs.contains_key(&job.uuid) {
            return Err(AppError::AlreadyExists(format!(
                "pending job {} already exists",
                job.uuid
            )));
        }
        if let Some(owner) = inner.by_tx_hash.get(&key) {
            return Err(AppError::AlreadyExists(format!(
                "transaction {} on chain {} is already tracked by job {}",
                key.1, key.0, owner
            )));
        }
        inner.index(&job, key);
        inner.jobs.insert(job.uuid.clone(), job);
        Ok(())
    }

    /// Replace a pending job, re-indexing its transaction hash
    pub fn update(&self, job: Job) -> Result<(), AppError> {
        let key = tx_key(&job)?;
        let mut inner = write(&self.inner);
        let previous = inner
            .jobs
            .remove(&job.uuid)
            .ok_or_else(|| AppError::NotFound(format!("pending job {} not found", job.uuid)))?;

        if let Some(owner) = inner.by_tx_hash.get(&key)
            && owner != &job.uuid
        {
            let owner = owner.clone();
            inner.jobs.insert(previous.uuid.clone(), previous);
            return Err(AppError::AlreadyExists(format!(
                "transaction {} on chain {} is already tracked by job {}",
                key.1, key.0, owner
            )));
        }

        inner.unindex(&previous);
        inner.index(&job, key);
        inner.jobs.insert(job.uuid.clone(), job);
        Ok(())
    }

    pub fn get_by_job_uuid(&self, uuid: &str) -> Result<Job, AppError> {
        read(&self.inner)
            .jobs
            .get(uuid)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("pending job {} not found", uuid)))
    }

    pub fn get_by_tx_hash(&self, chain_uuid: &str, tx_hash: &str) -> Result<Job, AppError> {
        let inner = read(&self.inner);
        inner
            .by_tx_hash
            .get(&(chain_uuid.to_string(), tx_hash.to_lowercase()))
            .and_then(|uuid| inner.jobs.get(uuid))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no pending job for transaction {} on chain {}",
                    tx_hash, chain_uuid
                ))
            })
    }

    /// Pending jobs whose parent is `parent_uuid`
    #[must_use]
    pub fn get_children(&self, parent_uuid: &str) -> Vec<Job> {
        let inner = read(&self.inner);
        inner
            .by_parent
            .get(parent_uuid)
            .map(|uuids| {
                uuids
                    .iter()
                    .filter_map(|uuid| inner.jobs.get(uuid).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn list_per_chain_uuid(&self, chain_uuid: &str) -> Vec<Job> {
        let inner = read(&self.inner);
        inner
            .by_chain
            .get(chain_uuid)
            .map(|uuids| {
                uuids
                    .iter()
                    .filter_map(|uuid| inner.jobs.get(uuid).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count_per_chain_uuid(&self, chain_uuid: &str) -> usize {
        read(&self.inner)
            .by_chain
            .get(chain_uuid)
            .map_or(0, HashSet::len)
    }

    pub fn remove(&self, uuid: &str) -> Result<Job, AppError> {
        let mut inner = write(&self.inner);
        let job = inner
            .jobs
            .remove(uuid)
            .ok_or_else(|| AppError::NotFound(format!("pending job {} not found", uuid)))?;
        inner.unindex(&job);
        Ok(job)
    }

    /// Drop every pending job of a chain, returning the removed jobs
    pub fn delete_per_chain_uuid(&self, chain_uuid: &str) -> Vec<Job> {
        let mut inner = write(&self.inner);
        let uuids: Vec<String> = inner
            .by_chain
            .get(chain_uuid)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut removed = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            if let Some(job) = inner.jobs.remove(&uuid) {
                inner.unindex(&job);
                removed.push(job);
            }
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.inner).jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.inner).jobs.is_empty()
    }
}

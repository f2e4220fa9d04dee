//! Chains currently owned by a listener session.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::{AppError, Chain};

use super::{read, write};

#[derive(Debug, Default)]
pub struct ChainStore {
    chains: RwLock<HashMap<String, Chain>>,
}

impl ChainStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, chain: Chain) -> Result<(), AppError> {
        let mut chains = write(&self.chains);
        if chains.contains_key(&chain.uuid) {
            return Err(AppError::AlreadyExists(format!(
                "chain {} is already tracked",
                chain.uuid
            )));
        }
        chains.insert(chain.uuid.clone(), chain);
        Ok(())
    }

    pub fn get(&self, uuid: &str) -> Result<Chain, AppError> {
        read(&self.chains)
            .get(uuid)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("chain {} is not tracked", uuid)))
    }

    #[must_use]
    pub fn contains(&self, uuid: &str) -> bool {
        read(&self.chains).contains_key(uuid)
    }

    pub fn update(&self, chain: Chain) -> Result<(), AppError> {
        let mut chains = write(&self.chains);
        match chains.get_mut(&chain.uuid) {
            Some(existing) => {
                *existing = chain;
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "chain {} is not tracked",
                chain.uuid
            ))),
        }
    }

    pub fn delete(&self, uuid: &str) -> Result<Chain, AppError> {
        write(&self.chains)
            .remove(uuid)
            .ok_or_else(|| AppError::NotFound(format!("chain {} is not tracked", uuid)))
    }

    #[must_use]
    pub fn list(&self) -> Vec<Chain> {
        read(&self.chains).values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.chains).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.chains).is_empty()
    }
}

//! Contract event subscriptions with per-chain address reference counts.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::ethereum::normalize_address;
use crate::domain::{AppError, Subscription};

use super::{read, write};

#[derive(Debug, Default)]
struct Inner {
    subscriptions: HashMap<String, Subscription>,
    by_address: HashMap<String, Vec<String>>,
    /// chain UUID -> address -> number of subscriptions referencing it
    addresses_per_chain: HashMap<String, HashMap<String, usize>>,
}

impl Inner {
    fn index(&mut self, subscription: &Subscription) {
        let address = normalize_address(&subscription.contract_address);
        self.by_address
            .entry(address.clone())
            .or_default()
            .push(subscription.uuid.clone());
        *self
            .addresses_per_chain
            .entry(subscription.chain_uuid.clone())
            .or_default()
            .entry(address)
            .or_insert(0) += 1;
    }

    fn unindex(&mut self, subscription: &Subscription) {
        let address = normalize_address(&subscription.contract_address);
        if let Some(uuids) = self.by_address.get_mut(&address) {
            uuids.retain(|uuid| uuid != &subscription.uuid);
            if uuids.is_empty() {
                self.by_address.remove(&address);
            }
        }
        if let Some(counts) = self.addresses_per_chain.get_mut(&subscription.chain_uuid) {
            if let Some(count) = counts.get_mut(&address) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&address);
                }
            }
            if counts.is_empty() {
                self.addresses_per_chain.remove(&subscription.chain_uuid);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionStore {
    inner: RwLock<Inner>,
}

impl SubscriptionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscription: Subscription) -> Result<(), AppError> {
        let mut inner = write(&self.inner);
        if inner.subscriptions.contains_key(&subscription.uuid) {
            return Err(AppError::AlreadyExists(format!(
                "subscription {} already exists",
                subscription.uuid
            )));
        }
        inner.index(&subscription);
        inner
            .subscriptions
            .insert(subscription.uuid.clone(), subscription);
        Ok(())
    }

    pub fn get(&self, uuid: &str) -> Result<Subscription, AppError> {
        read(&self.inner)
            .subscriptions
            .get(uuid)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("subscription {} not found", uuid)))
    }

    pub fn update(&self, subscription: Subscription) -> Result<(), AppError> {
        let mut inner = write(&self.inner);
        let previous = inner
            .subscriptions
            .remove(&subscription.uuid)
            .ok_or_else(|| {
                AppError::NotFound(format!("subscription {} not found", subscription.uuid))
            })?;
        inner.unindex(&previous);
        inner.index(&subscription);
        inner
            .subscriptions
            .insert(subscription.uuid.clone(), subscription);
        Ok(())
    }

    pub fn remove(&self, uuid: &str) -> Result<Subscription, AppError> {
        let mut inner = write(&self.inner);
        let subscription = inner
            .subscriptions
            .remove(uuid)
            .ok_or_else(|| AppError::NotFound(format!("subscription {} not found", uuid)))?;
        inner.unindex(&subscription);
        Ok(subscription)
    }

    /// Subscriptions watching `address` on `chain_uuid`
    #[must_use]
    pub fn list_per_address(&self, chain_uuid: &str, address: &str) -> Vec<Subscription> {
        let inner = read(&self.inner);
        inner
            .by_address
            .get(&normalize_address(address))
            .map(|uuids| {
                uuids
                    .iter()
                    .filter_map(|uuid| inner.subscriptions.get(uuid))
                    .filter(|s| s.chain_uuid == chain_uuid)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Addresses referenced by at least one subscription, sorted
    #[must_use]
    pub fn list_addresses_per_chain_uuid(&self, chain_uuid: &str) -> Vec<String> {
        let mut addresses: Vec<String> = read(&self.inner)
            .addresses_per_chain
            .get(chain_uuid)
            .map(|counts| {
                counts
                    .iter()
                    .filter(|(_, count)| **count > 0)
                    .map(|(address, _)| address.clone())
                    .collect()
            })
            .unwrap_or_default();
        addresses.sort();
        addresses
    }

    #[must_use]
    pub fn count_per_chain_uuid(&self, chain_uuid: &str) -> usize {
        read(&self.inner)
            .addresses_per_chain
            .get(chain_uuid)
            .map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.inner).subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.inner).subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(uuid: &str, chain: &str, address: &str) -> Subscription {
        Subscription {
            uuid: uuid.to_string(),
            chain_uuid: chain.to_string(),
            contract_address: address.to_string(),
            from_block: None,
            tenant_id: "tenant".to_string(),
        }
    }

    #[test]
    fn test_shared_address_survives_single_removal() {
        let store = SubscriptionStore::new();
        store.add(subscription("s1", "c1", "0xABCD")).unwrap();
        store.add(subscription("s2", "c1", "0xabcd")).unwrap();

        assert_eq!(store.list_addresses_per_chain_uuid("c1"), vec!["0xabcd"]);
        assert_eq!(store.list_per_address("c1", "0xAbCd").len(), 2);

        store.remove("s1").unwrap();
        assert_eq!(store.list_addresses_per_chain_uuid("c1"), vec!["0xabcd"]);

        store.remove("s2").unwrap();
        assert!(store.list_addresses_per_chain_uuid("c1").is_empty());
        assert_eq!(store.count_per_chain_uuid("c1"), 0);
        assert!(store.remove("s2").unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_moves_address() {
        let store = SubscriptionStore::new();
        store.add(subscription("s1", "c1", "0x01")).unwrap();
        store.update(subscription("s1", "c1", "0x02")).unwrap();

        assert_eq!(store.list_addresses_per_chain_uuid("c1"), vec!["0x02"]);
        assert!(store.list_per_address("c1", "0x01").is_empty());
        assert!(
            store
                .update(subscription("s9", "c1", "0x02"))
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_addresses_scoped_per_chain() {
        let store = SubscriptionStore::new();
        store.add(subscription("s1", "c1", "0x01")).unwrap();
        store.add(subscription("s2", "c2", "0x01")).unwrap();

        assert_eq!(store.list_per_address("c1", "0x01").len(), 1);
        assert!(store.add(subscription("s1", "c2", "0x03")).unwrap_err().is_already_exists());
        assert_eq!(store.len(), 2);
    }
}

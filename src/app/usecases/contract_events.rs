//! Forwarding of contract event logs to their subscribers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::domain::ethereum::normalize_address;
use crate::domain::{AppError, Chain, ContractEventLogsMessage, EventLog, NotificationClient};
use crate::store::SubscriptionStore;

pub struct ContractEventsUseCase {
    subscriptions: Arc<SubscriptionStore>,
    notifier: Arc<dyn NotificationClient>,
}

impl ContractEventsUseCase {
    #[must_use]
    pub fn new(subscriptions: Arc<SubscriptionStore>, notifier: Arc<dyn NotificationClient>) -> Self {
        Self {
            subscriptions,
            notifier,
        }
    }

    /// Group `logs` per subscription and notify each subscriber once.
    ///
    /// Logs of addresses nobody subscribes to are dropped. Returns the number
    /// of messages sent.
    #[instrument(skip(self, chain, logs), fields(chain_uuid = %chain.uuid, logs = logs.len()))]
    pub async fn execute(&self, chain: &Chain, logs: Vec<EventLog>) -> Result<usize, AppError> {
        let mut by_address: BTreeMap<String, Vec<EventLog>> = BTreeMap::new();
        for log in logs.into_iter().filter(|l| !l.removed) {
            by_address
                .entry(normalize_address(&log.address))
                .or_default()
                .push(log);
        }

        let mut sent = 0;
        for (address, logs) in by_address {
            let subscribers = self.subscriptions.list_per_address(&chain.uuid, &address);
            if subscribers.is_empty() {
                debug!(address = %address, "No subscriber for contract events, skipping");
                continue;
            }

            for subscription in subscribers {
                let matched: Vec<EventLog> = logs
                    .iter()
                    .filter(|l| subscription.from_block.is_none_or(|from| l.block_number >= from))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    continue;
                }

                let message = ContractEventLogsMessage {
                    chain_uuid: chain.uuid.clone(),
                    chain_id: chain.chain_id.clone(),
                    subscription_uuid: subscription.uuid.clone(),
                    tenant_id: subscription.tenant_id.clone(),
                    logs: matched,
                };
                self.notifier
                    .contract_event_logs_message(&message)
                    .await
                    .map_err(|e| e.in_component("contract-events"))?;
                sent += 1;
                info!(
                    subscription_uuid = %subscription.uuid,
                    address = %address,
                    count = message.logs.len(),
                    "Contract events forwarded"
                );
            }
        }
        Ok(sent)
    }
}

//! Subscription lifecycle events.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::app::listener::ChainSessionManager;
use crate::domain::{AppError, SubscriptionAction, SubscriptionEvent};
use crate::store::SubscriptionStore;

pub struct SubscriptionUseCase {
    subscriptions: Arc<SubscriptionStore>,
    chain_sessions: Arc<ChainSessionManager>,
}

impl SubscriptionUseCase {
    #[must_use]
    pub fn new(subscriptions: Arc<SubscriptionStore>, chain_sessions: Arc<ChainSessionManager>) -> Self {
        Self {
            subscriptions,
            chain_sessions,
        }
    }

    #[instrument(skip(self, event), fields(subscription_uuid = %event.subscription.uuid, action = ?event.action))]
    pub async fn execute(&self, event: SubscriptionEvent) -> Result<(), AppError> {
        let subscription = event.subscription;
        match event.action {
            SubscriptionAction::Created | SubscriptionAction::Updated => {
                let chain_uuid = subscription.chain_uuid.clone();
                let result = match event.action {
                    SubscriptionAction::Created => self.subscriptions.add(subscription.clone()),
                    _ => self.subscriptions.update(subscription.clone()),
                };
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_already_exists() => self.subscriptions.update(subscription)?,
                    Err(e) if e.is_not_found() => self.subscriptions.add(subscription)?,
                    Err(e) => return Err(e),
                }
                self.chain_sessions
                    .start_session(&chain_uuid)
                    .await
                    .map_err(|e| e.in_component("subscriptions"))?;
                info!(chain_uuid = %chain_uuid, "Subscription registered");
            }
            SubscriptionAction::Deleted => match self.subscriptions.remove(&subscription.uuid) {
                Ok(_) => info!("Subscription removed"),
                Err(e) if e.is_not_found() => debug!("Subscription unknown, nothing to remove"),
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }
}

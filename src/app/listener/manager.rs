//! Owner of the chain listener sessions: at most one per chain.
//!
//! The chain store is the lock: a session runs for a chain exactly while the
//! chain is present in the store, and `ChainStore::add` rejects duplicates.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};

use crate::app::config::ListenerConfig;
use crate::app::usecases::{ContractEventsUseCase, MinedJobUseCase};
use crate::domain::{AppError, Chain, ChainClient, OrchestrationClient};
use crate::store::{ChainStore, PendingJobStore, SubscriptionStore};

use super::session::ChainListenerSession;

pub struct ChainSessionManager {
    chains: Arc<ChainStore>,
    pending: Arc<PendingJobStore>,
    subscriptions: Arc<SubscriptionStore>,
    chain_client: Arc<dyn ChainClient>,
    orchestration: Arc<dyn OrchestrationClient>,
    mined: Arc<MinedJobUseCase>,
    events: Arc<ContractEventsUseCase>,
    config: ListenerConfig,
    /// Cancellation handle of each running session, tagged with its id
    tokens: DashMap<String, (u64, CancellationToken)>,
    next_session_id: AtomicU64,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl ChainSessionManager {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        chains: Arc<ChainStore>,
        pending: Arc<PendingJobStore>,
        subscriptions: Arc<SubscriptionStore>,
        chain_client: Arc<dyn ChainClient>,
        orchestration: Arc<dyn OrchestrationClient>,
        mined: Arc<MinedJobUseCase>,
        events: Arc<ContractEventsUseCase>,
        config: ListenerConfig,
        root: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            chains,
            pending,
            subscriptions,
            chain_client,
            orchestration,
            mined,
            events,
            config,
            tokens: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            root,
            tracker,
        }
    }

    /// Ensure a listener session runs for `chain_uuid`. Idempotent.
    #[instrument(skip(self))]
    pub async fn start_session(self: &Arc<Self>, chain_uuid: &str) -> Result<(), AppError> {
        if self.chains.contains(chain_uuid) {
            return Ok(());
        }
        let chain = self.resolve_chain(chain_uuid).await?;
        self.ensure_session(chain)
    }

    /// Chain metadata, from the store while tracked, else from the API
    pub async fn resolve_chain(&self, chain_uuid: &str) -> Result<Chain, AppError> {
        match self.chains.get(chain_uuid) {
            Ok(chain) => Ok(chain),
            Err(e) if e.is_not_found() => self
                .orchestration
                .get_chain(chain_uuid)
                .await
                .map_err(|e| e.in_component("chain-session-manager")),
            Err(e) => Err(e),
        }
    }

    /// Launch a session for an already resolved chain unless one is tracked
    pub fn ensure_session(self: &Arc<Self>, chain: Chain) -> Result<(), AppError> {
        match self.chains.add(chain.clone()) {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => return Ok(()),
            Err(e) => return Err(e),
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        self.tokens
            .insert(chain.uuid.clone(), (session_id, token.clone()));

        let manager = Arc::clone(self);
        self.tracker.spawn(async move {
            manager.supervise(chain, session_id, token).await;
        });
        Ok(())
    }

    /// Run sessions for `chain` until one ends with nothing left to do
    async fn supervise(&self, chain: Chain, session_id: u64, token: CancellationToken) {
        loop {
            let session = self.build_session(chain.clone());
            let result = session.run(token.clone()).await;
            match &result {
                Ok(()) => info!(chain_uuid = %chain.uuid, "Chain listener session ended"),
                Err(e) => error!(chain_uuid = %chain.uuid, error = %e, "Chain listener session failed"),
            }

            if let Err(e) = self.chains.delete(&chain.uuid)
                && !e.is_not_found()
            {
                warn!(chain_uuid = %chain.uuid, error = %e, "Failed to release chain");
            }

            if result.is_err() || token.is_cancelled() || !self.has_late_work(&chain.uuid) {
                break;
            }
            if self.chains.add(chain.clone()).is_err() {
                break;
            }
            info!(chain_uuid = %chain.uuid, "Work arrived, restarting chain listener session");
        }

        self.tokens
            .remove_if(&chain.uuid, |_, (id, _)| *id == session_id);
    }

    /// Work registered while the session was winding down
    fn has_late_work(&self, chain_uuid: &str) -> bool {
        self.pending.count_per_chain_uuid(chain_uuid) > 0
            || self.subscriptions.count_per_chain_uuid(chain_uuid) > 0
    }

    fn build_session(&self, chain: Chain) -> ChainListenerSession {
        let url = self.orchestration.chain_proxy_url(&chain.uuid);
        ChainListenerSession::new(
            chain,
            url,
            Arc::clone(&self.chain_client),
            Arc::clone(&self.pending),
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.mined),
            Arc::clone(&self.events),
            self.config.clone(),
        )
    }

    /// Cancel the session of a chain; `NotFound` if none runs
    pub fn stop_session(&self, chain_uuid: &str) -> Result<(), AppError> {
        let entry = self.tokens.get(chain_uuid).ok_or_else(|| {
            AppError::NotFound(format!("no listener session for chain {}", chain_uuid))
        })?;
        entry.value().1.cancel();
        info!(chain_uuid = %chain_uuid, "Chain listener session stop requested");
        Ok(())
    }

    pub fn stop_all(&self) {
        for entry in &self.tokens {
            entry.value().1.cancel();
        }
    }

    #[must_use]
    pub fn is_running(&self, chain_uuid: &str) -> bool {
        self.chains.contains(chain_uuid)
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.chains.len()
    }
}

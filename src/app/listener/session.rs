//! Chain listener session: block polling for one chain.
//!
//! Each tick fetches the head, fills the gap since the last processed block
//! with a bounded number of concurrent fetches, resolves pending jobs whose
//! transaction appears in a block, then forwards subscribed contract events.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::cancel::with_cancel;
use crate::app::config::ListenerConfig;
use crate::app::usecases::{ContractEventsUseCase, MinedJobUseCase};
use crate::domain::{AppError, Block, Chain, ChainClient, LogFilter};
use crate::store::{PendingJobStore, SubscriptionStore};

pub struct ChainListenerSession {
    chain: Chain,
    url: String,
    chain_client: Arc<dyn ChainClient>,
    pending: Arc<PendingJobStore>,
    subscriptions: Arc<SubscriptionStore>,
    mined: Arc<MinedJobUseCase>,
    events: Arc<ContractEventsUseCase>,
    config: ListenerConfig,
    cur_block_number: Option<u64>,
    empty_ticks: u32,
}

impl ChainListenerSession {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        chain: Chain,
        url: String,
        chain_client: Arc<dyn ChainClient>,
        pending: Arc<PendingJobStore>,
        subscriptions: Arc<SubscriptionStore>,
        mined: Arc<MinedJobUseCase>,
        events: Arc<ContractEventsUseCase>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            chain,
            url,
            chain_client,
            pending,
            subscriptions,
            mined,
            events,
            config,
            cur_block_number: None,
            empty_ticks: 0,
        }
    }

    #[must_use]
    pub fn cur_block_number(&self) -> Option<u64> {
        self.cur_block_number
    }

    /// Poll until cancelled, out of work, or failed with a non-retryable error
    pub async fn run(mut self, token: CancellationToken) -> Result<(), AppError> {
        let period = self
            .chain
            .block_time()
            .unwrap_or(self.config.default_block_time);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            chain_uuid = %self.chain.uuid,
            chain_id = %self.chain.chain_id,
            period_ms = period.as_millis() as u64,
            "Chain listener session started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!(chain_uuid = %self.chain.uuid, "Chain listener session cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            match self.tick(&token).await {
                Ok(()) => {}
                Err(AppError::Cancelled) => {
                    info!(chain_uuid = %self.chain.uuid, "Chain listener session cancelled");
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    warn!(chain_uuid = %self.chain.uuid, error = %e, "Tick failed, retrying next tick");
                }
                Err(e) => return Err(e.in_component("chain-listener")),
            }

            if self.has_work() {
                self.empty_ticks = 0;
            } else {
                self.empty_ticks += 1;
                if self.empty_ticks >= self.config.empty_tick_threshold {
                    info!(
                        chain_uuid = %self.chain.uuid,
                        empty_ticks = self.empty_ticks,
                        "No pending work left, chain listener session stopping"
                    );
                    return Ok(());
                }
            }
        }
    }

    fn has_work(&self) -> bool {
        self.pending.count_per_chain_uuid(&self.chain.uuid) > 0
            || self.subscriptions.count_per_chain_uuid(&self.chain.uuid) > 0
    }

    /// Process every block after the cursor up to the head
    pub async fn tick(&mut self, token: &CancellationToken) -> Result<(), AppError> {
        let latest = with_cancel(token, self.chain_client.latest_block(&self.url)).await?;
        let cur = *self
            .cur_block_number
            .get_or_insert(latest.number.saturating_sub(1));
        if latest.number <= cur {
            return Ok(());
        }

        let from = cur + 1;
        let mut blocks = self.fetch_blocks(from, latest.number, token).await?;
        let to = latest.number;
        blocks.push(latest);

        for block in &blocks {
            self.process_block(block, token).await?;
        }
        self.process_events(from, to, token).await?;

        self.cur_block_number = Some(to);
        debug!(chain_uuid = %self.chain.uuid, from, to, "Blocks processed");
        Ok(())
    }

    /// Fetch `[from, to)` in order with at most `max_in_flight_blocks` requests in flight
    async fn fetch_blocks(
        &self,
        from: u64,
        to: u64,
        token: &CancellationToken,
    ) -> Result<Vec<Block>, AppError> {
        if from >= to {
            return Ok(Vec::new());
        }
        let fetches = stream::iter(from..to)
            .map(|number| self.chain_client.block_by_number(&self.url, number))
            .buffered(self.config.max_in_flight_blocks.max(1))
            .try_collect::<Vec<_>>();
        with_cancel(token, fetches).await
    }

    async fn process_block(&self, block: &Block, token: &CancellationToken) -> Result<(), AppError> {
        for tx_hash in &block.transactions {
            let job = match self.pending.get_by_tx_hash(&self.chain.uuid, tx_hash) {
                Ok(job) => job,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };

            info!(
                chain_uuid = %self.chain.uuid,
                job_uuid = %job.uuid,
                tx_hash = %tx_hash,
                block_number = block.number,
                "Pending transaction mined"
            );

            match self.mined.execute(job.clone(), token).await {
                Ok(()) => {}
                Err(e) if e.is_retryable() || matches!(e, AppError::Cancelled) => return Err(e),
                Err(e) => {
                    warn!(job_uuid = %job.uuid, error = %e, "Mined job could not be finalized, dropping it");
                }
            }

            match self.pending.remove(&job.uuid) {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn process_events(
        &self,
        from: u64,
        to: u64,
        token: &CancellationToken,
    ) -> Result<(), AppError> {
        let addresses = self
            .subscriptions
            .list_addresses_per_chain_uuid(&self.chain.uuid);
        if addresses.is_empty() {
            return Ok(());
        }

        let filter = LogFilter {
            addresses,
            from_block: from,
            to_block: to,
        };
        let logs = with_cancel(token, self.chain_client.filter_logs(&self.url, &filter)).await?;
        if logs.is_empty() {
            return Ok(());
        }
        with_cancel(token, self.events.execute(&self.chain, logs)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::{MinedJobConfig, SentryConfig};
    use crate::app::sentry::{RetrySessionManager, RetryUseCase};
    use crate::domain::{EventLog, Job, JobStatus, JobType, Receipt, Subscription};
    use crate::store::RetrySessionStore;
    use crate::test_utils::{MockChainClient, MockNotificationClient, MockOrchestrationClient};
    use tokio_util::task::TaskTracker;

    struct Fixture {
        chain: Arc<MockChainClient>,
        orchestration: Arc<MockOrchestrationClient>,
        notifier: Arc<MockNotificationClient>,
        pending: Arc<PendingJobStore>,
        subscriptions: Arc<SubscriptionStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                chain: Arc::new(MockChainClient::new()),
                orchestration: Arc::new(MockOrchestrationClient::new()),
                notifier: Arc::new(MockNotificationClient::new()),
                pending: Arc::new(PendingJobStore::new()),
                subscriptions: Arc::new(SubscriptionStore::new()),
            }
        }

        fn session(&self, config: ListenerConfig) -> ChainListenerSession {
            let retry_sessions = Arc::new(RetrySessionManager::new(
                Arc::new(RetrySessionStore::new()),
                Arc::clone(&self.pending),
                self.orchestration.clone(),
                Arc::new(RetryUseCase::new(self.orchestration.clone())),
                SentryConfig::default(),
                CancellationToken::new(),
                TaskTracker::new(),
            ));
            let mined = Arc::new(MinedJobUseCase::new(
                self.chain.clone(),
                self.orchestration.clone(),
                Arc::clone(&self.pending),
                retry_sessions,
                MinedJobConfig::default(),
            ));
            let events = Arc::new(ContractEventsUseCase::new(
                Arc::clone(&self.subscriptions),
                self.notifier.clone(),
            ));
            ChainListenerSession::new(
                chain(),
                "http://rpc".to_string(),
                self.chain.clone(),
                Arc::clone(&self.pending),
                Arc::clone(&self.subscriptions),
                mined,
                events,
                config,
            )
        }
    }

    fn chain() -> Chain {
        Chain {
            uuid: "c1".to_string(),
            name: "besu".to_string(),
            chain_id: "1337".to_string(),
            urls: vec!["http://rpc".to_string()],
            listener_block_time_ms: 1_000,
            tenant_id: "t".to_string(),
        }
    }

    fn pending_job(uuid: &str, hash: &str) -> Job {
        let mut job = Job::new(uuid, "c1", "t", JobType::EthTransaction);
        job.status = JobStatus::Pending;
        job.transaction.hash = Some(hash.to_string());
        job
    }

    fn block(number: u64, transactions: &[&str]) -> Block {
        Block {
            number,
            hash: format!("0xblock{}", number),
            transactions: transactions.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_first_tick_processes_head_only() {
        let f = Fixture::new();
        f.chain.push_block(block(9, &[]));
        f.chain.push_block(block(10, &[]));
        let mut session = f.session(ListenerConfig::default());

        session.tick(&CancellationToken::new()).await.unwrap();

        assert_eq!(session.cur_block_number(), Some(10));
        assert!(f.chain.fetched_blocks().is_empty());
    }

    #[tokio::test]
    async fn test_gap_filled_in_order_and_never_reprocessed() {
        let f = Fixture::new();
        f.chain.push_block(block(5, &[]));
        let mut session = f.session(ListenerConfig {
            max_in_flight_blocks: 2,
            ..Default::default()
        });
        let token = CancellationToken::new();
        session.tick(&token).await.unwrap();

        for n in 6..=9 {
            f.chain.push_block(block(n, &[]));
        }
        session.tick(&token).await.unwrap();
        assert_eq!(session.cur_block_number(), Some(9));
        let mut fetched = f.chain.fetched_blocks();
        fetched.sort_unstable();
        assert_eq!(fetched, vec![6, 7, 8]);

        // Same head again: nothing to do
        session.tick(&token).await.unwrap();
        assert_eq!(f.chain.fetched_blocks().len(), 3);
        assert_eq!(session.cur_block_number(), Some(9));
    }

    #[tokio::test]
    async fn test_mined_transaction_resolves_pending_job() {
        let f = Fixture::new();
        f.chain.push_block(block(1, &[]));
        let mut session = f.session(ListenerConfig::default());
        let token = CancellationToken::new();
        session.tick(&token).await.unwrap();

        f.pending.add(pending_job("j1", "0xaa")).unwrap();
        f.orchestration.insert_job(pending_job("j1", "0xaa"));
        f.chain.set_receipt(Receipt {
            tx_hash: "0xaa".to_string(),
            block_number: 2,
            status: 1,
            ..Default::default()
        });
        f.chain.push_block(block(2, &["0xAA", "0xunrelated"]));

        session.tick(&token).await.unwrap();

        assert!(f.pending.is_empty());
        let updates = f.orchestration.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "j1");
        assert_eq!(updates[0].1.status, Some(JobStatus::Mined));
    }

    #[tokio::test]
    async fn test_subscribed_events_forwarded() {
        let f = Fixture::new();
        f.chain.push_block(block(1, &[]));
        f.subscriptions
            .add(Subscription {
                uuid: "s1".to_string(),
                chain_uuid: "c1".to_string(),
                contract_address: "0xcafe".to_string(),
                from_block: None,
                tenant_id: "t".to_string(),
            })
            .unwrap();
        f.chain.add_log(EventLog {
            address: "0xCAFE".to_string(),
            block_number: 2,
            ..Default::default()
        });
        let mut session = f.session(ListenerConfig::default());
        let token = CancellationToken::new();
        session.tick(&token).await.unwrap();

        f.chain.push_block(block(2, &[]));
        session.tick(&token).await.unwrap();

        let messages = f.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subscription_uuid, "s1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_empty_ticks() {
        let f = Fixture::new();
        f.chain.push_block(block(1, &[]));
        let session = f.session(ListenerConfig::default());

        session.run(CancellationToken::new()).await.unwrap();

        assert_eq!(f.chain.latest_block_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_terminates() {
        let f = Fixture::new();
        f.chain.fail_latest_block("method not found");
        let session = f.session(ListenerConfig::default());

        let err = session.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Blockchain(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_clean() {
        let f = Fixture::new();
        f.chain.push_block(block(1, &[]));
        f.pending.add(pending_job("j1", "0xaa")).unwrap();
        let session = f.session(ListenerConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        session.run(token).await.unwrap();
    }
}

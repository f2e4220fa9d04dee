//! Wiring of the transaction listener subsystem.
//!
//! `TxListener` owns the state stores, both session managers and the message
//! consumer. Every background task is spawned on one `TaskTracker` and governed
//! by one root `CancellationToken`, so `shutdown` stops them all.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, instrument, warn};

use crate::app::config::TxListenerConfig;
use crate::app::consumer::MessageConsumer;
use crate::app::listener::ChainSessionManager;
use crate::app::sentry::{RetrySessionManager, RetryUseCase};
use crate::app::usecases::{
    ContractEventsUseCase, MinedJobUseCase, PendingJobUseCase, SubscriptionUseCase,
};
use crate::domain::{
    AppError, ChainClient, Envelope, JobFilters, JobStatus, NotificationClient,
    OrchestrationClient,
};
use crate::store::{ChainStore, MessageStore, PendingJobStore, RetrySessionStore, SubscriptionStore};

pub struct TxListener {
    pending: Arc<PendingJobStore>,
    subscriptions: Arc<SubscriptionStore>,
    messages: Arc<MessageStore>,
    chain_sessions: Arc<ChainSessionManager>,
    retry_sessions: Arc<RetrySessionManager>,
    pending_jobs: Arc<PendingJobUseCase>,
    consumer: Arc<MessageConsumer>,
    orchestration: Arc<dyn OrchestrationClient>,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl TxListener {
    #[must_use]
    pub fn new(
        config: TxListenerConfig,
        chain_client: Arc<dyn ChainClient>,
        orchestration: Arc<dyn OrchestrationClient>,
        notifier: Arc<dyn NotificationClient>,
        root: CancellationToken,
    ) -> Self {
        let tracker = TaskTracker::new();
        let pending = Arc::new(PendingJobStore::new());
        let subscriptions = Arc::new(SubscriptionStore::new());
        let messages = Arc::new(MessageStore::new());

        let retry_sessions = Arc::new(RetrySessionManager::new(
            Arc::new(RetrySessionStore::new()),
            Arc::clone(&pending),
            Arc::clone(&orchestration),
            Arc::new(RetryUseCase::new(Arc::clone(&orchestration))),
            config.sentry,
            root.clone(),
            tracker.clone(),
        ));
        let mined = Arc::new(MinedJobUseCase::new(
            Arc::clone(&chain_client),
            Arc::clone(&orchestration),
            Arc::clone(&pending),
            Arc::clone(&retry_sessions),
            config.mined,
        ));
        let events = Arc::new(ContractEventsUseCase::new(
            Arc::clone(&subscriptions),
            notifier,
        ));
        let chain_sessions = Arc::new(ChainSessionManager::new(
            Arc::new(ChainStore::new()),
            Arc::clone(&pending),
            Arc::clone(&subscriptions),
            Arc::clone(&chain_client),
            Arc::clone(&orchestration),
            mined.clone(),
            events,
            config.listener,
            root.clone(),
            tracker.clone(),
        ));
        let pending_jobs = Arc::new(PendingJobUseCase::new(
            Arc::clone(&pending),
            Arc::clone(&messages),
            Arc::clone(&chain_sessions),
            Arc::clone(&retry_sessions),
            mined,
            chain_client,
            Arc::clone(&orchestration),
        ));
        let subscription_use_case = Arc::new(SubscriptionUseCase::new(
            Arc::clone(&subscriptions),
            Arc::clone(&chain_sessions),
        ));
        let consumer = Arc::new(MessageConsumer::new(
            Arc::clone(&messages),
            Arc::clone(&pending_jobs),
            subscription_use_case,
            Arc::clone(&orchestration),
            config.consumer,
        ));

        Self {
            pending,
            subscriptions,
            messages,
            chain_sessions,
            retry_sessions,
            pending_jobs,
            consumer,
            orchestration,
            root,
            tracker,
        }
    }

    #[must_use]
    pub fn consumer(&self) -> Arc<MessageConsumer> {
        Arc::clone(&self.consumer)
    }

    /// Handle one envelope under the subsystem's root token
    pub async fn handle(&self, envelope: Envelope) -> Result<(), AppError> {
        self.consumer.handle(envelope, &self.root).await
    }

    /// Replay every PENDING job of the orchestration API through intake
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, AppError> {
        let filters = JobFilters {
            status: Some(JobStatus::Pending),
            ..Default::default()
        };
        let jobs = self
            .orchestration
            .search_jobs(&filters)
            .await
            .map_err(|e| e.in_component("recovery"))?;

        let mut recovered = 0;
        for job in jobs {
            let job_uuid = job.uuid.clone();
            match self.pending_jobs.execute(job, &self.root).await {
                Ok(_) => recovered += 1,
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => warn!(job_uuid = %job_uuid, error = %e, "Failed to recover pending job"),
            }
        }
        info!(recovered = recovered, "Pending jobs recovered");
        Ok(recovered)
    }

    /// Consume envelopes from the in-process bus until shutdown
    pub fn spawn_bus_consumer(&self, mut receiver: mpsc::Receiver<Envelope>) {
        let consumer = Arc::clone(&self.consumer);
        let token = self.root.clone();
        self.tracker.spawn(async move {
            info!("Message bus consumer started");
            loop {
                let envelope = tokio::select! {
                    _ = token.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                match consumer.handle(envelope, &token).await {
                    Ok(()) | Err(AppError::Cancelled) => {}
                    Err(e) => warn!(error = %e, "Message handling failed"),
                }
            }
            info!("Message bus consumer stopped");
        });
    }

    #[must_use]
    pub fn pending_jobs(&self) -> &Arc<PendingJobStore> {
        &self.pending
    }

    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionStore> {
        &self.subscriptions
    }

    #[must_use]
    pub fn messages(&self) -> &Arc<MessageStore> {
        &self.messages
    }

    #[must_use]
    pub fn chain_sessions(&self) -> usize {
        self.chain_sessions.active_sessions()
    }

    #[must_use]
    pub fn retry_sessions(&self) -> usize {
        self.retry_sessions.active_sessions()
    }

    #[must_use]
    pub fn is_chain_listened(&self, chain_uuid: &str) -> bool {
        self.chain_sessions.is_running(chain_uuid)
    }

    #[must_use]
    pub fn is_job_retried(&self, job_uuid: &str) -> bool {
        self.retry_sessions.is_running(job_uuid)
    }

    /// Cancel every session and wait for all background tasks to finish
    pub async fn shutdown(&self) {
        info!("Shutting down transaction listener");
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!(
            pending_jobs = self.pending.len(),
            "Transaction listener stopped"
        );
    }
}

//! End-to-end flows of the embedded tx-listener.
//!
//! The job service, the in-process bus and the listener run together against
//! an in-memory repository and a scripted chain, the way the server wires them
//! when no remote orchestration API is configured.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tx_orchestrator::app::{JobService, TxListener, TxListenerConfig};
use tx_orchestrator::domain::{
    Block, Chain, CreateJobRequest, InternalData, Job, JobStatus, JobType, Receipt, Transaction,
    TransactionType, UpdateJobRequest,
};
use tx_orchestrator::infra::{LocalOrchestrationClient, channel};
use tx_orchestrator::test_utils::{
    InMemoryJobRepository, MockChainClient, MockNotificationClient,
};

const TENANT: &str = "acme";

struct Harness {
    repository: Arc<InMemoryJobRepository>,
    chain: Arc<MockChainClient>,
    jobs: Arc<JobService>,
    listener: Arc<TxListener>,
}

impl Harness {
    fn new() -> Self {
        let repository = Arc::new(InMemoryJobRepository::new());
        repository.insert_chain(Chain {
            uuid: "c1".to_string(),
            name: "besu".to_string(),
            chain_id: "1337".to_string(),
            urls: vec!["http://node:8545".to_string()],
            listener_block_time_ms: 1_000,
            tenant_id: TENANT.to_string(),
        });

        let chain = Arc::new(MockChainClient::new());
        chain.push_block(Block {
            number: 1,
            hash: "0x01".to_string(),
            transactions: vec![],
        });

        let (publisher, receiver) = channel(16);
        let jobs = Arc::new(JobService::new(repository.clone(), Arc::new(publisher)));
        let listener = Arc::new(TxListener::new(
            TxListenerConfig::default(),
            chain.clone(),
            Arc::new(LocalOrchestrationClient::new(Arc::clone(&jobs))),
            Arc::new(MockNotificationClient::new()),
            CancellationToken::new(),
        ));
        listener.spawn_bus_consumer(receiver);

        Self {
            repository,
            chain,
            jobs,
            listener,
        }
    }

    fn tenants() -> Vec<String> {
        vec![TENANT.to_string()]
    }

    async fn create_started_job(&self, internal_data: InternalData) -> Job {
        let request = CreateJobRequest {
            schedule_uuid: None,
            chain_uuid: "c1".to_string(),
            job_type: JobType::EthTransaction,
            transaction: Transaction {
                from: Some("0x7e654d251da770a068413677967f6d3ea2fea9e4".to_string()),
                to: Some("0xd71400dad07d70c976d6aafc241af1ea183a7236".to_string()),
                gas: Some("0x5208".to_string()),
                gas_price: Some("0x3b9aca00".to_string()),
                transaction_type: TransactionType::Legacy,
                ..Default::default()
            },
            internal_data,
        };
        let job = self.jobs.create_job(request, TENANT).await.unwrap();
        self.jobs.start_job(&job.uuid, &Self::tenants()).await.unwrap()
    }

    /// Plays the sender: broadcast the transaction and report the job PENDING
    async fn broadcast(&self, job: &Job, tx_hash: &str) -> Job {
        let mut transaction = job.transaction.clone();
        transaction.hash = Some(tx_hash.to_string());
        let request = UpdateJobRequest {
            status: Some(JobStatus::Pending),
            message: Some("transaction sent".to_string()),
            transaction: Some(transaction),
            ..Default::default()
        };
        let job = self
            .jobs
            .update_job(&job.uuid, request, &Self::tenants())
            .await
            .unwrap();
        settle().await;
        job
    }

    fn mine(&self, number: u64, tx_hash: &str, contract_address: Option<&str>) {
        self.chain.set_receipt(Receipt {
            tx_hash: tx_hash.to_string(),
            block_hash: Some(format!("0x{:02x}", number)),
            block_number: number,
            status: 1,
            contract_address: contract_address.map(str::to_string),
            gas_used: 21_000,
            ..Default::default()
        });
        self.chain.push_block(Block {
            number,
            hash: format!("0x{:02x}", number),
            transactions: vec![tx_hash.to_string()],
        });
    }

    fn stored(&self, uuid: &str) -> Job {
        self.repository
            .get_all_jobs()
            .into_iter()
            .find(|j| j.uuid == uuid)
            .unwrap()
    }
}

/// Let spawned tasks drain the bus
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_pending_job_is_mined_by_the_listener() {
    let h = Harness::new();
    let job = h.create_started_job(InternalData::default()).await;
    h.broadcast(&job, "0xaa").await;

    assert_eq!(h.listener.pending_jobs().len(), 1);
    assert!(h.listener.is_chain_listened("c1"));
    assert_eq!(h.listener.retry_sessions(), 0);

    h.mine(2, "0xaa", None);
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let mined = h.stored(&job.uuid);
    assert_eq!(mined.status, JobStatus::Mined);
    assert_eq!(mined.receipt.as_ref().unwrap().block_number, 2);
    assert!(h.listener.pending_jobs().is_empty());

    // Out of work: the chain session stops on its own
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!h.listener.is_chain_listened("c1"));

    h.listener.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sentry_retries_then_sibling_is_never_mined() {
    let h = Harness::new();
    let root = h
        .create_started_job(InternalData {
            retry_interval_ms: 5_000,
            gas_price_increment: 0.1,
            gas_price_limit: 0.5,
            ..Default::default()
        })
        .await;
    h.broadcast(&root, "0xaa").await;
    assert!(h.listener.is_job_retried(&root.uuid));

    // First sentry tick replaces the transaction with a 10% more expensive one
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    let children: Vec<Job> = h
        .repository
        .get_all_jobs()
        .into_iter()
        .filter(|j| j.internal_data.parent_job_uuid.as_deref() == Some(root.uuid.as_str()))
        .collect();
    assert_eq!(children.len(), 1);
    let child = children[0].clone();
    assert_eq!(child.status, JobStatus::Started);
    assert_eq!(child.transaction.gas_price.as_deref(), Some("0x4190ab00"));
    assert!(child.transaction.hash.is_none());

    h.broadcast(&child, "0xbb").await;
    assert_eq!(h.listener.pending_jobs().len(), 2);

    h.mine(2, "0xbb", None);
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    assert_eq!(h.stored(&child.uuid).status, JobStatus::Mined);
    let root_after = h.stored(&root.uuid);
    assert_eq!(root_after.status, JobStatus::NeverMined);
    assert_eq!(
        root_after.last_log().unwrap().message,
        format!("job {} of the same lineage was mined", child.uuid)
    );
    assert!(h.listener.pending_jobs().is_empty());
    assert!(!h.listener.is_job_retried(&root.uuid));

    h.listener.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deployed_contract_code_hash_is_registered() {
    let h = Harness::new();
    let contract = "0x8f2a55949038a9610f50fb23b5883af3b4ecb3c3";
    h.chain.set_code(contract, vec![0x60, 0x80, 0x60, 0x40]);

    let job = h.create_started_job(InternalData::default()).await;
    h.broadcast(&job, "0xdd").await;
    h.mine(2, "0xdd", Some(contract));
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(h.stored(&job.uuid).status, JobStatus::Mined);
    let hashes = h.repository.code_hashes();
    assert_eq!(hashes.len(), 1);
    assert_eq!(hashes[0].chain_id, "1337");
    assert_eq!(hashes[0].address, contract);
    assert!(hashes[0].code_hash.starts_with("0x"));
    assert_eq!(hashes[0].code_hash.len(), 66);

    h.listener.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_recovers_pending_jobs() {
    let h = Harness::new();
    let job = h.create_started_job(InternalData::default()).await;
    h.broadcast(&job, "0xaa").await;
    h.listener.shutdown().await;

    // A fresh listener over the same job service rebuilds its stores
    let (_publisher, receiver) = channel(4);
    let restarted = TxListener::new(
        TxListenerConfig::default(),
        h.chain.clone(),
        Arc::new(LocalOrchestrationClient::new(Arc::clone(&h.jobs))),
        Arc::new(MockNotificationClient::new()),
        CancellationToken::new(),
    );
    restarted.spawn_bus_consumer(receiver);

    assert_eq!(restarted.recover().await.unwrap(), 1);
    assert_eq!(restarted.pending_jobs().len(), 1);
    assert!(restarted.is_chain_listened("c1"));

    h.mine(2, "0xaa", None);
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.stored(&job.uuid).status, JobStatus::Mined);

    restarted.shutdown().await;
}

use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use validator::Validate;

use tx_orchestrator::domain::ethereum::increment_quantity;
use tx_orchestrator::domain::{
    CreateJobRequest, Envelope, Job, JobFilters, JobStatus, JobType, PENDING_JOB_TOPIC,
};
use tx_orchestrator::store::PendingJobStore;

fn pending_job(index: usize) -> Job {
    let mut job = Job::new(
        format!("job-{}", index),
        format!("chain-{}", index % 4),
        "acme",
        JobType::EthTransaction,
    );
    job.status = JobStatus::Pending;
    job.transaction.hash = Some(format!("0x{:064x}", index));
    job.transaction.gas_price = Some("0x3b9aca00".to_string());
    job
}

fn bench_validation(c: &mut Criterion) {
    let request: CreateJobRequest = serde_json::from_value(json!({
        "chain_uuid": "chain-0",
        "type": "eth_transaction",
        "transaction": {"gas_price": "0x3b9aca00"}
    }))
    .unwrap();

    c.bench_function("validate_create_job_request", |b| {
        b.iter(|| {
            let _ = black_box(&request).validate();
        })
    });
}

fn bench_increment_quantity(c: &mut Criterion) {
    c.bench_function("increment_gas_price", |b| {
        b.iter(|| increment_quantity(black_box("0x3b9aca00"), black_box(0.1)))
    });
}

fn bench_filters(c: &mut Criterion) {
    let jobs: Vec<Job> = (0..1_000).map(pending_job).collect();
    let filters = JobFilters {
        chain_uuid: Some("chain-1".to_string()),
        status: Some(JobStatus::Pending),
        only_parents: true,
        ..Default::default()
    };

    c.bench_function("filter_1000_jobs", |b| {
        b.iter(|| jobs.iter().filter(|j| black_box(&filters).matches(j)).count())
    });
}

fn bench_envelope_decode(c: &mut Criterion) {
    let raw = json!({
        "topic": PENDING_JOB_TOPIC,
        "offset": 42,
        "type": "pending-job",
        "body": pending_job(1),
    })
    .to_string();

    c.bench_function("decode_pending_job_envelope", |b| {
        b.iter(|| Envelope::decode(black_box(raw.as_bytes())))
    });
}

fn bench_pending_store(c: &mut Criterion) {
    let store = PendingJobStore::new();
    for i in 0..1_000 {
        store.add(pending_job(i)).unwrap();
    }
    let hash = format!("0x{:064x}", 517);

    c.bench_function("pending_store_lookup_by_hash", |b| {
        b.iter(|| store.get_by_tx_hash(black_box("chain-1"), black_box(&hash)))
    });
}

criterion_group!(
    benches,
    bench_validation,
    bench_increment_quantity,
    bench_filters,
    bench_envelope_decode,
    bench_pending_store
);
criterion_main!(benches);

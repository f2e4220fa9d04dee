//! Job use-cases: creation, start, status updates and retries.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::ethereum::increment_quantity;
use crate::domain::{
    AppError, Chain, CodeHashRequest, CreateJobRequest, Envelope, HealthResponse, HealthStatus,
    InternalData, Job, JobEventPublisher, JobFilters, JobRepository, JobStatus, JobType, JobUpdate,
    Log, RetryJobTxRequest, TransactionType, UpdateJobRequest, ValidationError, WILDCARD_TENANT,
};

use super::status::check_transition;

/// Owner of job state. Every method is scoped to the caller's tenants.
pub struct JobService {
    repository: Arc<dyn JobRepository>,
    publisher: Arc<dyn JobEventPublisher>,
}

impl JobService {
    #[must_use]
    pub fn new(repository: Arc<dyn JobRepository>, publisher: Arc<dyn JobEventPublisher>) -> Self {
        Self {
            repository,
            publisher,
        }
    }

    #[instrument(skip(self, request), fields(chain_uuid = %request.chain_uuid))]
    pub async fn create_job(
        &self,
        request: CreateJobRequest,
        tenant_id: &str,
    ) -> Result<Job, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        let chain = self.get_chain(&request.chain_uuid).await?;
        if let Some(parent) = &request.internal_data.parent_job_uuid {
            self.get_job(parent, &[tenant_id.to_string()]).await?;
        }

        let mut job = Job::new(
            Uuid::new_v4().to_string(),
            request.chain_uuid,
            tenant_id,
            request.job_type,
        );
        job.schedule_uuid = request.schedule_uuid;
        job.transaction = request.transaction;
        job.internal_data = request.internal_data;
        if job.internal_data.chain_id.is_empty() {
            job.internal_data.chain_id = chain.chain_id;
        }
        job.logs.push(Log::new(JobStatus::Created, "job created"));

        self.repository.insert_job(&job).await?;
        info!(job_uuid = %job.uuid, "Job created");
        Ok(job)
    }

    #[instrument(skip(self, tenants))]
    pub async fn start_job(&self, uuid: &str, tenants: &[String]) -> Result<Job, AppError> {
        let mut job = self.get_job(uuid, tenants).await?;
        let log = transition(&mut job, JobStatus::Started, "job started")?;
        self.repository
            .persist_job_updates(&[JobUpdate {
                job: job.clone(),
                log: Some(log),
            }])
            .await?;
        info!(job_uuid = %job.uuid, "Job started");
        Ok(job)
    }

    /// Apply a partial update.
    ///
    /// A job reaching MINED moves every other PENDING job of its lineage to
    /// NEVER_MINED in the same write. A job reaching PENDING is published to
    /// the tx-listener.
    #[instrument(skip(self, request, tenants), fields(status = ?request.status))]
    pub async fn update_job(
        &self,
        uuid: &str,
        request: UpdateJobRequest,
        tenants: &[String],
    ) -> Result<Job, AppError> {
        let mut job = self.get_job(uuid, tenants).await?;
        if job.status.is_final() {
            return Err(AppError::InvalidState(format!(
                "job {} is already {}",
                job.uuid, job.status
            )));
        }

        if let Some(transaction) = request.transaction {
            job.transaction = transaction;
        }
        if let Some(internal_data) = request.internal_data {
            job.internal_data = internal_data;
        }
        if let Some(receipt) = request.receipt {
            job.receipt = Some(receipt);
        }

        let message = request.message.unwrap_or_default();
        let log = match request.status {
            Some(status) if status.is_annotation() => {
                check_transition(&job.uuid, job.status, status)?;
                let log = Log::new(status, message);
                job.logs.push(log.clone());
                Some(log)
            }
            Some(status) => {
                if status == JobStatus::Pending && job.tx_hash().is_none() {
                    return Err(AppError::Validation(ValidationError::MissingField(
                        "transaction.hash".to_string(),
                    )));
                }
                Some(transition(&mut job, status, message)?)
            }
            None => None,
        };
        job.updated_at = Utc::now();

        let mut updates = vec![JobUpdate {
            job: job.clone(),
            log,
        }];
        if request.status == Some(JobStatus::Mined) {
            updates.extend(self.never_mined_siblings(&job).await?);
        }
        self.repository.persist_job_updates(&updates).await?;

        if updates.len() > 1 {
            info!(
                job_uuid = %job.uuid,
                siblings = updates.len() - 1,
                "Sibling jobs marked as never mined"
            );
        }
        // The job is already persisted; recovery replays it on restart
        if request.status == Some(JobStatus::Pending)
            && let Err(e) = self
                .publisher
                .publish(Envelope::pending_job(job.clone(), 0))
                .await
        {
            warn!(job_uuid = %job.uuid, error = %e, "Failed to publish pending job");
        }

        info!(job_uuid = %job.uuid, status = %job.status, "Job updated");
        Ok(job)
    }

    /// Every other PENDING job of the lineage, moved to NEVER_MINED
    async fn never_mined_siblings(&self, winner: &Job) -> Result<Vec<JobUpdate>, AppError> {
        let filters = JobFilters {
            parent_job_uuid: Some(winner.lineage_root().to_string()),
            status: Some(JobStatus::Pending),
            ..Default::default()
        };
        let siblings = self
            .repository
            .search_jobs(&filters, &[WILDCARD_TENANT.to_string()])
            .await?;

        let mut updates = Vec::new();
        for mut sibling in siblings.into_iter().filter(|s| s.uuid != winner.uuid) {
            let log = transition(
                &mut sibling,
                JobStatus::NeverMined,
                format!("job {} of the same lineage was mined", winner.uuid),
            )?;
            updates.push(JobUpdate {
                job: sibling,
                log: Some(log),
            });
        }
        Ok(updates)
    }

    /// Record a re-broadcast of a pending transaction
    #[instrument(skip(self, tenants))]
    pub async fn resend_job_tx(&self, uuid: &str, tenants: &[String]) -> Result<Job, AppError> {
        let mut job = self.get_job(uuid, tenants).await?;
        require_pending(&job)?;

        let log = Log::new(JobStatus::Resending, "transaction resent");
        job.logs.push(log.clone());
        job.updated_at = Utc::now();
        self.repository
            .persist_job_updates(&[JobUpdate {
                job: job.clone(),
                log: Some(log),
            }])
            .await?;
        info!(job_uuid = %job.uuid, "Job transaction resent");
        Ok(job)
    }

    /// Create and start a child job carrying a re-priced copy of the transaction
    #[instrument(skip(self, request, tenants))]
    pub async fn retry_job_tx(
        &self,
        uuid: &str,
        request: RetryJobTxRequest,
        tenants: &[String],
    ) -> Result<Job, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        let job = self.get_job(uuid, tenants).await?;
        require_pending(&job)?;

        let mut transaction = job.transaction.clone();
        transaction.hash = None;
        transaction.raw = None;
        if request.gas_increment > 0.0 {
            if job.job_type == JobType::EthRawTransaction {
                return Err(AppError::InvalidState(format!(
                    "raw transaction of job {} cannot be re-priced",
                    job.uuid
                )));
            }
            match transaction.transaction_type {
                TransactionType::Legacy => {
                    let price = required(&transaction.gas_price, "transaction.gas_price")?;
                    transaction.gas_price = Some(increment_quantity(price, request.gas_increment)?);
                }
                TransactionType::DynamicFee => {
                    let fee_cap = required(&transaction.gas_fee_cap, "transaction.gas_fee_cap")?;
                    transaction.gas_fee_cap =
                        Some(increment_quantity(fee_cap, request.gas_increment)?);
                    if let Some(tip) = &transaction.gas_tip_cap {
                        transaction.gas_tip_cap = Some(increment_quantity(tip, request.gas_increment)?);
                    }
                }
            }
        }
        if let Some(data) = request.data {
            transaction.data = Some(data);
        }

        let mut child = Job::new(
            Uuid::new_v4().to_string(),
            job.chain_uuid.clone(),
            job.tenant_id.clone(),
            job.job_type,
        );
        child.schedule_uuid = job.schedule_uuid.clone();
        child.transaction = transaction;
        child.internal_data = InternalData {
            parent_job_uuid: Some(job.lineage_root().to_string()),
            has_been_retried: false,
            ..job.internal_data.clone()
        };
        child
            .logs
            .push(Log::new(JobStatus::Created, format!("retry of job {}", job.uuid)));
        self.repository.insert_job(&child).await?;

        let log = transition(&mut child, JobStatus::Started, "job started")?;
        self.repository
            .persist_job_updates(&[JobUpdate {
                job: child.clone(),
                log: Some(log),
            }])
            .await?;

        info!(
            job_uuid = %job.uuid,
            child_uuid = %child.uuid,
            gas_increment = request.gas_increment,
            "Retry child job started"
        );
        Ok(child)
    }

    pub async fn get_job(&self, uuid: &str, tenants: &[String]) -> Result<Job, AppError> {
        self.repository
            .find_job(uuid, tenants)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {} not found", uuid)))
    }

    pub async fn search_jobs(
        &self,
        filters: &JobFilters,
        tenants: &[String],
    ) -> Result<Vec<Job>, AppError> {
        self.repository.search_jobs(filters, tenants).await
    }

    pub async fn get_chain(&self, uuid: &str) -> Result<Chain, AppError> {
        self.repository
            .find_chain(uuid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("chain {} not found", uuid)))
    }

    #[instrument(skip(self, chain), fields(chain_uuid = %chain.uuid))]
    pub async fn register_chain(&self, chain: Chain) -> Result<Chain, AppError> {
        if chain.uuid.is_empty() {
            return Err(AppError::Validation(ValidationError::MissingField(
                "uuid".to_string(),
            )));
        }
        if chain.urls.is_empty() {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "urls".to_string(),
                message: "at least one node URL is required".to_string(),
            }));
        }
        self.repository.upsert_chain(&chain).await?;
        info!(chain_id = %chain.chain_id, "Chain registered");
        Ok(chain)
    }

    pub async fn set_contract_code_hash(&self, request: &CodeHashRequest) -> Result<(), AppError> {
        self.repository.upsert_code_hash(request).await?;
        info!(
            chain_id = %request.chain_id,
            address = %request.address,
            "Contract code hash stored"
        );
        Ok(())
    }

    pub async fn health_check(&self, chain_sessions: usize, retry_sessions: usize) -> HealthResponse {
        let database = match self.repository.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "Job repository health check failed");
                HealthStatus::Unhealthy
            }
        };
        HealthResponse::new(database, chain_sessions, retry_sessions)
    }
}

fn transition(job: &mut Job, status: JobStatus, message: impl Into<String>) -> Result<Log, AppError> {
    check_transition(&job.uuid, job.status, status)?;
    let log = Log::new(status, message);
    job.status = status;
    job.updated_at = log.created_at;
    job.logs.push(log.clone());
    Ok(log)
}

fn require_pending(job: &Job) -> Result<(), AppError> {
    if job.status == JobStatus::Pending {
        Ok(())
    } else {
        Err(AppError::InvalidState(format!(
            "job {} is {}, expected PENDING",
            job.uuid, job.status
        )))
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .ok_or_else(|| AppError::Validation(ValidationError::MissingField(field.to_string())))
}

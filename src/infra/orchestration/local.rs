//! In-process orchestration client calling the job service directly.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::app::jobs::JobService;
use crate::domain::{
    AppError, Chain, CodeHashRequest, Job, JobFilters, OrchestrationClient, RetryJobTxRequest,
    UpdateJobRequest, WILDCARD_TENANT,
};

/// Orchestration client for a listener embedded in the orchestration server.
/// Chain RPC calls go straight to the first node URL of the chain.
pub struct LocalOrchestrationClient {
    jobs: Arc<JobService>,
    chain_urls: DashMap<String, String>,
    tenants: Vec<String>,
}

impl LocalOrchestrationClient {
    #[must_use]
    pub fn new(jobs: Arc<JobService>) -> Self {
        Self {
            jobs,
            chain_urls: DashMap::new(),
            tenants: vec![WILDCARD_TENANT.to_string()],
        }
    }
}

#[async_trait]
impl OrchestrationClient for LocalOrchestrationClient {
    async fn get_chain(&self, chain_uuid: &str) -> Result<Chain, AppError> {
        let chain = self.jobs.get_chain(chain_uuid).await?;
        if let Some(url) = chain.urls.first() {
            self.chain_urls.insert(chain.uuid.clone(), url.clone());
        }
        Ok(chain)
    }

    fn chain_proxy_url(&self, chain_uuid: &str) -> String {
        self.chain_urls
            .get(chain_uuid)
            .map(|url| url.clone())
            .unwrap_or_default()
    }

    async fn get_job(&self, job_uuid: &str) -> Result<Job, AppError> {
        self.jobs.get_job(job_uuid, &self.tenants).await
    }

    async fn search_jobs(&self, filters: &JobFilters) -> Result<Vec<Job>, AppError> {
        self.jobs.search_jobs(filters, &self.tenants).await
    }

    async fn update_job(
        &self,
        job_uuid: &str,
        request: &UpdateJobRequest,
    ) -> Result<Job, AppError> {
        self.jobs
            .update_job(job_uuid, request.clone(), &self.tenants)
            .await
    }

    async fn retry_job_tx(
        &self,
        job_uuid: &str,
        request: &RetryJobTxRequest,
    ) -> Result<Job, AppError> {
        self.jobs
            .retry_job_tx(job_uuid, request.clone(), &self.tenants)
            .await
    }

    async fn resend_job_tx(&self, job_uuid: &str) -> Result<(), AppError> {
        self.jobs.resend_job_tx(job_uuid, &self.tenants).await?;
        Ok(())
    }

    async fn set_contract_address_code_hash(
        &self,
        request: &CodeHashRequest,
    ) -> Result<(), AppError> {
        self.jobs.set_contract_code_hash(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{InMemoryJobRepository, RecordingPublisher};

    #[tokio::test]
    async fn test_chain_url_cached_from_get_chain() {
        let repository = Arc::new(InMemoryJobRepository::new());
        repository.insert_chain(Chain {
            uuid: "c1".to_string(),
            name: "besu".to_string(),
            chain_id: "1337".to_string(),
            urls: vec!["http://node-1:8545".to_string(), "http://node-2:8545".to_string()],
            listener_block_time_ms: 0,
            tenant_id: "t".to_string(),
        });
        let jobs = Arc::new(JobService::new(repository, Arc::new(RecordingPublisher::new())));
        let client = LocalOrchestrationClient::new(jobs);

        assert_eq!(client.chain_proxy_url("c1"), "");
        client.get_chain("c1").await.unwrap();
        assert_eq!(client.chain_proxy_url("c1"), "http://node-1:8545");
        assert!(client.get_chain("c2").await.unwrap_err().is_not_found());
    }
}

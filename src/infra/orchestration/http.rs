//! HTTP client of a remote orchestration API.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::domain::{
    AppError, Chain, CodeHashRequest, ErrorResponse, ExternalServiceError, Job, JobFilters,
    OrchestrationClient, RetryJobTxRequest, UpdateJobRequest, WILDCARD_TENANT,
};

/// Header carrying the tenant scope of a request
pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// Configuration for the orchestration API client
#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    /// Route chain RPC calls through `{base_url}/proxy/chains/{uuid}`
    pub use_proxy: bool,
    pub timeout: Duration,
}

impl OrchestrationConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            use_proxy: false,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Orchestration API client over HTTP
pub struct HttpOrchestrationClient {
    http_client: Client,
    config: OrchestrationConfig,
    /// First node URL of each chain seen through `get_chain`
    chain_urls: DashMap<String, String>,
}

impl HttpOrchestrationClient {
    pub fn new(config: OrchestrationConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::Configuration(e.to_string()))
            })?;
        Ok(Self {
            http_client,
            config,
            chain_urls: DashMap::new(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url, path);
        let mut builder = self
            .http_client
            .request(method, url)
            .header(TENANT_HEADER, WILDCARD_TENANT);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, AppError> {
        let response = builder.send().await.map_err(|e| {
            error!(error = %e, "Orchestration API request failed");
            if e.is_timeout() {
                AppError::ExternalService(ExternalServiceError::Timeout(e.to_string()))
            } else {
                AppError::ExternalService(ExternalServiceError::Network(e.to_string()))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let decoded = serde_json::from_str::<ErrorResponse>(&body).ok();
        let message = decoded
            .as_ref()
            .map_or_else(|| body.clone(), |r| r.error.message.clone());
        let kind = decoded.as_ref().map(|r| r.error.r#type.as_str());
        debug!(status = %status, message = %message, "Orchestration API returned error");
        Err(map_status(status, kind, message))
    }

    async fn send_json<R: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<R, AppError> {
        self.send(builder).await?.json().await.map_err(|e| {
            AppError::ExternalService(ExternalServiceError::InvalidResponse(e.to_string()))
        })
    }
}

fn map_status(status: StatusCode, kind: Option<&str>, message: String) -> AppError {
    match status {
        StatusCode::NOT_FOUND => AppError::NotFound(message),
        StatusCode::CONFLICT => AppError::AlreadyExists(message),
        StatusCode::BAD_REQUEST if kind == Some("invalid_state") => AppError::InvalidState(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => AppError::Validation(
            crate::domain::ValidationError::Multiple(message),
        ),
        StatusCode::TOO_MANY_REQUESTS => {
            AppError::ExternalService(ExternalServiceError::RateLimited(message))
        }
        s if s.is_server_error() => {
            AppError::ExternalService(ExternalServiceError::Unavailable(format!("{}: {}", s, message)))
        }
        s => AppError::ExternalService(ExternalServiceError::InvalidResponse(format!(
            "{}: {}",
            s, message
        ))),
    }
}

fn filters_query(filters: &JobFilters) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if !filters.tx_hashes.is_empty() {
        query.push(("tx_hashes", filters.tx_hashes.join(",")));
    }
    if let Some(chain_uuid) = &filters.chain_uuid {
        query.push(("chain_uuid", chain_uuid.clone()));
    }
    if let Some(status) = filters.status {
        query.push(("status", status.to_string()));
    }
    if let Some(parent) = &filters.parent_job_uuid {
        query.push(("parent_job_uuid", parent.clone()));
    }
    if filters.only_parents {
        query.push(("only_parents", "true".to_string()));
    }
    query
}

#[async_trait]
impl OrchestrationClient for HttpOrchestrationClient {
    #[instrument(skip(self))]
    async fn get_chain(&self, chain_uuid: &str) -> Result<Chain, AppError> {
        let chain: Chain = self
            .send_json(self.request(Method::GET, &format!("/chains/{}", chain_uuid)))
            .await?;
        if let Some(url) = chain.urls.first() {
            self.chain_urls.insert(chain.uuid.clone(), url.clone());
        }
        Ok(chain)
    }

    fn chain_proxy_url(&self, chain_uuid: &str) -> String {
        if !self.config.use_proxy
            && let Some(url) = self.chain_urls.get(chain_uuid)
        {
            return url.clone();
        }
        format!("{}/proxy/chains/{}", self.config.base_url, chain_uuid)
    }

    async fn get_job(&self, job_uuid: &str) -> Result<Job, AppError> {
        self.send_json(self.request(Method::GET, &format!("/jobs/{}", job_uuid)))
            .await
    }

    async fn search_jobs(&self, filters: &JobFilters) -> Result<Vec<Job>, AppError> {
        self.send_json(
            self.request(Method::GET, "/jobs")
                .query(&filters_query(filters)),
        )
        .await
    }

    #[instrument(skip(self, request), fields(status = ?request.status))]
    async fn update_job(
        &self,
        job_uuid: &str,
        request: &UpdateJobRequest,
    ) -> Result<Job, AppError> {
        self.send_json(
            self.request(Method::PATCH, &format!("/jobs/{}", job_uuid))
                .json(request),
        )
        .await
    }

    #[instrument(skip(self, request))]
    async fn retry_job_tx(
        &self,
        job_uuid: &str,
        request: &RetryJobTxRequest,
    ) -> Result<Job, AppError> {
        self.send_json(
            self.request(Method::PUT, &format!("/jobs/{}/retry", job_uuid))
                .json(request),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn resend_job_tx(&self, job_uuid: &str) -> Result<(), AppError> {
        self.send(self.request(Method::PUT, &format!("/jobs/{}/resend", job_uuid)))
            .await?;
        Ok(())
    }

    async fn set_contract_address_code_hash(
        &self,
        request: &CodeHashRequest,
    ) -> Result<(), AppError> {
        self.send(
            self.request(Method::PUT, "/contracts/code-hashes")
                .json(request),
        )
        .await?;
        Ok(())
    }
}

//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, info};
use utoipa::{IntoParams, OpenApi};

use crate::app::AppState;
use crate::domain::{
    AppError, BlockchainError, Chain, CodeHashRequest, CreateJobRequest, DatabaseError, Envelope,
    ErrorDetail, ErrorResponse, ExternalServiceError, HealthResponse, HealthStatus, InternalData,
    Job, JobFilters, JobStatus, JobType, Log, MessagePayload, RetryJobTxRequest, Subscription,
    SubscriptionAction, SubscriptionEvent, Transaction, TransactionType, UpdateJobRequest,
    WILDCARD_TENANT,
};
use crate::infra::orchestration::TENANT_HEADER;

/// Tenant owning jobs created without an `X-Tenant-ID` header
pub const DEFAULT_TENANT: &str = "default";

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Transaction Orchestrator API",
        version = "0.1.0",
        description = "Job lifecycle, chain registry and tx-listener ingestion",
        license(
            name = "MIT"
        )
    ),
    paths(
        create_job_handler,
        search_jobs_handler,
        get_job_handler,
        update_job_handler,
        start_job_handler,
        resend_job_handler,
        retry_job_handler,
        get_chain_handler,
        register_chain_handler,
        set_code_hash_handler,
        ingest_message_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            Job,
            JobStatus,
            JobType,
            Transaction,
            TransactionType,
            InternalData,
            Log,
            Chain,
            CreateJobRequest,
            UpdateJobRequest,
            RetryJobTxRequest,
            CodeHashRequest,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
            Envelope,
            MessagePayload,
            SubscriptionEvent,
            SubscriptionAction,
            Subscription,
        )
    ),
    tags(
        (name = "jobs", description = "Job lifecycle endpoints"),
        (name = "chains", description = "Chain registry endpoints"),
        (name = "listener", description = "Tx-listener message ingestion"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Tenants the caller may act on, from a comma separated `X-Tenant-ID`
#[must_use]
pub fn tenant_scope(headers: &HeaderMap) -> Vec<String> {
    let tenants: Vec<String> = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    if tenants.is_empty() {
        vec![DEFAULT_TENANT.to_string()]
    } else {
        tenants
    }
}

/// Tenant recorded as the owner of a new job
fn owner_tenant(tenants: &[String]) -> &str {
    tenants
        .iter()
        .find(|t| *t != WILDCARD_TENANT)
        .map_or(DEFAULT_TENANT, String::as_str)
}

/// Query string accepted by the job search endpoint
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default)]
pub struct SearchJobsQuery {
    /// Comma separated transaction hashes
    pub tx_hashes: Option<String>,
    pub chain_uuid: Option<String>,
    pub status: Option<JobStatus>,
    /// Matches the parent itself and its children
    pub parent_job_uuid: Option<String>,
    pub only_parents: Option<bool>,
}

impl From<SearchJobsQuery> for JobFilters {
    fn from(query: SearchJobsQuery) -> Self {
        Self {
            tx_hashes: query
                .tx_hashes
                .map(|h| {
                    h.split(',')
                        .map(str::trim)
                        .filter(|h| !h.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            chain_uuid: query.chain_uuid,
            status: query.status,
            parent_job_uuid: query.parent_job_uuid,
            only_parents: query.only_parents.unwrap_or(false),
        }
    }
}

/// Create a job
///
/// The job starts CREATED. A parent job, when given, must be visible to the caller.
#[utoipa::path(
    post,
    path = "/jobs",
    tag = "jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 200, description = "Job created", body = Job),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "Chain or parent job not found", body = ErrorResponse)
    )
)]
pub async fn create_job_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateJobRequest>,
) -> Result<Json<Job>, AppError> {
    let tenants = tenant_scope(&headers);
    let job = state.jobs.create_job(payload, owner_tenant(&tenants)).await?;
    Ok(Json(job))
}

/// Search jobs ordered by creation time
#[utoipa::path(
    get,
    path = "/jobs",
    tag = "jobs",
    params(SearchJobsQuery),
    responses(
        (status = 200, description = "Matching jobs", body = Vec<Job>)
    )
)]
pub async fn search_jobs_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SearchJobsQuery>,
) -> Result<Json<Vec<Job>>, AppError> {
    let filters = JobFilters::from(query);
    let jobs = state
        .jobs
        .search_jobs(&filters, &tenant_scope(&headers))
        .await?;
    Ok(Json(jobs))
}

/// Get a job with its logs
#[utoipa::path(
    get,
    path = "/jobs/{uuid}",
    tag = "jobs",
    params(
        ("uuid" = String, Path, description = "Job UUID")
    ),
    responses(
        (status = 200, description = "Job found", body = Job),
        (status = 404, description = "Job not found", body = ErrorResponse)
    )
)]
pub async fn get_job_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
) -> Result<Json<Job>, AppError> {
    let job = state.jobs.get_job(&uuid, &tenant_scope(&headers)).await?;
    Ok(Json(job))
}

/// Update a job
///
/// Status changes follow the job state machine. RESENDING, WARNING and
/// RECOVERING only append a log. Final jobs reject every update.
#[utoipa::path(
    patch,
    path = "/jobs/{uuid}",
    tag = "jobs",
    params(
        ("uuid" = String, Path, description = "Job UUID")
    ),
    request_body = UpdateJobRequest,
    responses(
        (status = 200, description = "Job updated", body = Job),
        (status = 400, description = "Invalid state or validation error", body = ErrorResponse),
        (status = 404, description = "Job not found", body = ErrorResponse)
    )
)]
pub async fn update_job_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
    Json(payload): Json<UpdateJobRequest>,
) -> Result<Json<Job>, AppError> {
    let job = state
        .jobs
        .update_job(&uuid, payload, &tenant_scope(&headers))
        .await?;
    Ok(Json(job))
}

#[utoipa::path(
    put,
    path = "/jobs/{uuid}/start",
    tag = "jobs",
    params(
        ("uuid" = String, Path, description = "Job UUID")
    ),
    responses(
        (status = 200, description = "Job started", body = Job),
        (status = 400, description = "Job is not CREATED", body = ErrorResponse),
        (status = 404, description = "Job not found", body = ErrorResponse)
    )
)]
pub async fn start_job_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
) -> Result<Json<Job>, AppError> {
    let job = state.jobs.start_job(&uuid, &tenant_scope(&headers)).await?;
    Ok(Json(job))
}

/// Record a re-broadcast of the pending transaction
#[utoipa::path(
    put,
    path = "/jobs/{uuid}/resend",
    tag = "jobs",
    params(
        ("uuid" = String, Path, description = "Job UUID")
    ),
    responses(
        (status = 204, description = "Transaction resent"),
        (status = 400, description = "Job is not PENDING", body = ErrorResponse),
        (status = 404, description = "Job not found", body = ErrorResponse)
    )
)]
pub async fn resend_job_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .jobs
        .resend_job_tx(&uuid, &tenant_scope(&headers))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replace the pending transaction with a higher-fee child job
#[utoipa::path(
    put,
    path = "/jobs/{uuid}/retry",
    tag = "jobs",
    params(
        ("uuid" = String, Path, description = "Job UUID")
    ),
    request_body = RetryJobTxRequest,
    responses(
        (status = 200, description = "Child job created and started", body = Job),
        (status = 400, description = "Job is not PENDING or cannot be re-priced", body = ErrorResponse),
        (status = 404, description = "Job not found", body = ErrorResponse)
    )
)]
pub async fn retry_job_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
    Json(payload): Json<RetryJobTxRequest>,
) -> Result<Json<Job>, AppError> {
    let child = state
        .jobs
        .retry_job_tx(&uuid, payload, &tenant_scope(&headers))
        .await?;
    Ok(Json(child))
}

#[utoipa::path(
    get,
    path = "/chains/{uuid}",
    tag = "chains",
    params(
        ("uuid" = String, Path, description = "Chain UUID")
    ),
    responses(
        (status = 200, description = "Chain found", body = Chain),
        (status = 404, description = "Chain not found", body = ErrorResponse)
    )
)]
pub async fn get_chain_handler(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<Chain>, AppError> {
    let chain = state.jobs.get_chain(&uuid).await?;
    Ok(Json(chain))
}

/// Register or replace a chain
#[utoipa::path(
    put,
    path = "/chains",
    tag = "chains",
    request_body = Chain,
    responses(
        (status = 200, description = "Chain registered", body = Chain),
        (status = 400, description = "Validation error", body = ErrorResponse)
    )
)]
pub async fn register_chain_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Chain>,
) -> Result<Json<Chain>, AppError> {
    let chain = state.jobs.register_chain(payload).await?;
    Ok(Json(chain))
}

#[utoipa::path(
    put,
    path = "/contracts/code-hashes",
    tag = "chains",
    request_body = CodeHashRequest,
    responses(
        (status = 204, description = "Code hash stored")
    )
)]
pub async fn set_code_hash_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CodeHashRequest>,
) -> Result<StatusCode, AppError> {
    state.jobs.set_contract_code_hash(&payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deliver an envelope to the tx-listener
///
/// Accepts `pending-job` and `subscription` envelopes. The response is sent
/// once the envelope has been fully handled.
#[utoipa::path(
    post,
    path = "/messages",
    tag = "listener",
    request_body(content = Envelope, content_type = "application/json"),
    responses(
        (status = 202, description = "Envelope handled"),
        (status = 400, description = "Malformed envelope", body = ErrorResponse),
        (status = 502, description = "Tx-listener disabled or dependency failure", body = ErrorResponse)
    )
)]
pub async fn ingest_message_handler(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<StatusCode, AppError> {
    let listener = state.tx_listener.as_ref().ok_or_else(|| {
        AppError::ExternalService(ExternalServiceError::Unavailable(
            "tx-listener is disabled".to_string(),
        ))
    })?;
    let envelope = Envelope::decode(&body)?;
    let kind = envelope.payload.kind();
    listener.handle(envelope).await?;
    info!(kind, "Envelope handled");
    Ok(StatusCode::ACCEPTED)
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.health_check().await)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
            AppError::InvalidState(_) => (StatusCode::BAD_REQUEST, "invalid_state"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "database_error")
                }
                DatabaseError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                DatabaseError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            },
            AppError::Blockchain(bc_err) => match bc_err {
                BlockchainError::Connection(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "blockchain_error")
                }
                BlockchainError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                _ => (StatusCode::BAD_GATEWAY, "blockchain_error"),
            },
            AppError::ExternalService(ext_err) => match ext_err {
                ExternalServiceError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                ExternalServiceError::RateLimited(_) => {
                    (StatusCode::TOO_MANY_REQUESTS, "rate_limited")
                }
                _ => (StatusCode::BAD_GATEWAY, "external_service_error"),
            },
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            AppError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
            AppError::Deserialization(_) => (StatusCode::BAD_REQUEST, "deserialization_error"),
            AppError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

//! Router assembly.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::app::AppState;

use super::handlers::{
    ApiDoc, create_job_handler, get_chain_handler, get_job_handler, health_check_handler,
    ingest_message_handler, liveness_handler, readiness_handler, register_chain_handler,
    resend_job_handler, retry_job_handler, search_jobs_handler, set_code_hash_handler,
    start_job_handler, update_job_handler,
};

/// Build the application router with tracing, CORS and Swagger UI
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/jobs", post(create_job_handler).get(search_jobs_handler))
        .route("/jobs/{uuid}", get(get_job_handler).patch(update_job_handler))
        .route("/jobs/{uuid}/start", put(start_job_handler))
        .route("/jobs/{uuid}/resend", put(resend_job_handler))
        .route("/jobs/{uuid}/retry", put(retry_job_handler))
        .route("/chains", put(register_chain_handler))
        .route("/chains/{uuid}", get(get_chain_handler))
        .route("/contracts/code-hashes", put(set_code_hash_handler))
        .route("/messages", post(ingest_message_handler))
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

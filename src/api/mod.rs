//! The API layer, containing web handlers and routing.

pub mod handlers;
pub mod router;

pub use handlers::{ApiDoc, DEFAULT_TENANT, tenant_scope};
pub use router::create_router;

//! Job lifecycle: status state machine and job use-cases.

pub mod service;
pub mod status;

pub use service::JobService;
pub use status::{can_transition, check_transition};

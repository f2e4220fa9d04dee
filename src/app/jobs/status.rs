//! Job status state machine.
//!
//! ```text
//! CREATED -> STARTED -> PENDING -> MINED | FAILED | NEVER_MINED
//!                    \-> STORED
//! ```
//!
//! FAILED is reachable from every non-final status. RESENDING, WARNING and
//! RECOVERING are annotations: they append a log and leave the status alone.

use crate::domain::{AppError, JobStatus};

/// Whether `from -> to` is a legal status change
#[must_use]
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;

    if from.is_final() {
        return false;
    }
    if to.is_annotation() {
        return from != Created;
    }
    matches!(
        (from, to),
        (Created, Started)
            | (Created, Failed)
            | (Started, Pending)
            | (Started, Stored)
            | (Started, Failed)
            | (Pending, Pending)
            | (Pending, Mined)
            | (Pending, Failed)
            | (Pending, NeverMined)
    )
}

pub fn check_transition(job_uuid: &str, from: JobStatus, to: JobStatus) -> Result<(), AppError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(AppError::InvalidState(format!(
            "job {} cannot move from {} to {}",
            job_uuid, from, to
        )))
    }
}

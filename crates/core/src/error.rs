//! Job error model.

use thiserror::Error;

use crate::status::JobStatus;

/// Result type used across the job domain.
pub type JobResult<T> = Result<T, JobError>;

/// Job-level error.
///
/// Storage failures belong to the store adapters, not here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// A status change outside the transition table was attempted.
    ///
    /// The engine never does this on its own; seeing it means a caller bug.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// No handler is registered for the job type.
    #[error("no handler registered for job type: {0}")]
    HandlerNotFound(String),

    /// A handler returned an error (or panicked). Displays the bare message.
    #[error("{0}")]
    HandlerExecution(String),
}

impl JobError {
    pub fn handler_not_found(job_type: impl Into<String>) -> Self {
        Self::HandlerNotFound(job_type.into())
    }

    pub fn handler_execution(msg: impl Into<String>) -> Self {
        Self::HandlerExecution(msg.into())
    }
}

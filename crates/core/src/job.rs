//! The job entity and its state transitions.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JobError, JobResult};
use crate::id::JobId;
use crate::status::JobStatus;

/// Opaque handler input. The engine never inspects it.
pub type Payload = HashMap<String, serde_json::Value>;

/// A typed, payload-carrying unit of work with a retry budget.
///
/// Mutated only through the `mark_*` operations, which enforce the
/// transition table in [`JobStatus::can_transition_to`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    job_type: String,
    payload: Payload,
    status: JobStatus,
    attempts: u32,
    max_retry: u32,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a pending job.
    ///
    /// `max_retry` is the total number of attempts allowed; `0` is raised to
    /// `1` so every job is tried at least once.
    pub fn new(job_type: impl Into<String>, payload: Payload, max_retry: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_retry: max_retry.max(1),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// Last failure message; `None` once the job completes.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `attempts < max_retry`.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_retry
    }

    /// Delay before the next attempt: `attempts²` seconds, no jitter.
    pub fn backoff_duration(&self) -> Duration {
        Self::backoff_for_attempts(self.attempts)
    }

    pub fn backoff_for_attempts(attempts: u32) -> Duration {
        let attempts = u64::from(attempts);
        Duration::from_secs(attempts * attempts)
    }

    /// Take ownership for execution: `Pending -> Processing`, one more attempt.
    pub fn mark_running(&mut self) -> JobResult<()> {
        self.change_status(JobStatus::Processing)?;
        self.attempts += 1;
        Ok(())
    }

    /// `Processing -> Completed`, clearing any earlier failure message.
    pub fn mark_completed(&mut self) -> JobResult<()> {
        self.change_status(JobStatus::Completed)?;
        self.error = None;
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Goes back to `Pending` while the retry budget lasts, otherwise to
    /// `Failed`. Returns the resulting status.
    pub fn mark_failed(&mut self, error: impl std::fmt::Display) -> JobResult<JobStatus> {
        let target = if self.can_retry() {
            JobStatus::Pending
        } else {
            JobStatus::Failed
        };
        self.change_status(target)?;
        self.error = Some(error.to_string());
        Ok(target)
    }

    /// `Processing -> Failed` regardless of the retry budget.
    ///
    /// For failures no retry can fix, such as a job type without a handler.
    pub fn mark_failed_permanently(&mut self, error: impl std::fmt::Display) -> JobResult<()> {
        self.change_status(JobStatus::Failed)?;
        self.error = Some(error.to_string());
        Ok(())
    }

    fn change_status(&mut self, to: JobStatus) -> JobResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

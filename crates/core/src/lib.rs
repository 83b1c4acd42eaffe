//! `jobforge-core`: job entity and state machine.
//!
//! This crate contains **pure domain** primitives (no async, no IO). The
//! engine that drives jobs lives in `jobforge-infra`.

pub mod error;
pub mod id;
pub mod job;
pub mod status;

pub use error::{JobError, JobResult};
pub use id::JobId;
pub use job::{Job, Payload};
pub use status::JobStatus;

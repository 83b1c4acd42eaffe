//! Infrastructure layer: the asynchronous job engine.
//!
//! Wires the pure job model from `jobforge-core` to a tokio worker pool,
//! a handler registry and a job store.

pub mod config;
pub mod jobs;

pub use config::{ConfigError, QueueConfig};
pub use jobs::{
    InMemoryJobStore, JobContext, JobHandler, JobQueue, JobStore, JobStoreError, PoolState,
    PoolStats, QueueError, Registry, StoreStats, WorkerPool,
};

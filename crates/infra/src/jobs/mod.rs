//! In-process job engine with retry and backoff.
//!
//! ## Design
//!
//! - Jobs are typed by a string key routed to a registered handler
//! - A fixed pool of tokio workers drains one bounded intake queue
//! - Failed jobs are re-offered after `attempts²` seconds until the retry
//!   budget runs out
//! - Graceful shutdown waits for in-flight handlers and pending retry timers
//!
//! ## Components
//!
//! - `JobHandler` / `JobContext`: the executable capability and what it sees
//! - `Registry`: job type -> handler lookup
//! - `JobStore`: persistence for job snapshots (in-memory adapter included)
//! - `WorkerPool`: workers, dispatch, retry scheduling, shutdown barrier
//! - `JobQueue`: facade tying the above together

pub mod handler;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod store;

pub use handler::{JobContext, JobHandler};
pub use pool::{PoolState, PoolStats, WorkerPool};
pub use queue::{JobQueue, QueueError};
pub use registry::Registry;
pub use store::{InMemoryJobStore, JobStore, JobStoreError, StoreStats};

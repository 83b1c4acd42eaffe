//! Handler abstraction.

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use jobforge_core::{JobId, Payload};

/// What a handler knows about the attempt it is running.
///
/// `cancellation` is the pool-wide shutdown signal; long-running handlers
/// should watch it and return early once it fires.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub job_type: String,
    /// 1-based attempt number of this execution
    pub attempt: u32,
    pub max_retry: u32,
    pub cancellation: CancellationToken,
}

impl JobContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_retry
    }
}

/// Executable capability bound to one job type.
///
/// Handlers are stateless with respect to jobs: they receive a copy of the
/// payload and report success or failure. Any
/// `Fn(JobContext, Payload) -> impl Future<Output = anyhow::Result<()>>`
/// closure is a handler.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: JobContext, payload: Payload) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext, payload: Payload) -> anyhow::Result<()> {
        (self)(ctx, payload).await
    }
}

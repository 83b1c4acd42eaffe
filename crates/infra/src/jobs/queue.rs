//! Job queue facade: submit, look up, start and stop.

use std::sync::Arc;

use jobforge_core::{Job, JobId, JobStatus, Payload};

use super::handler::JobHandler;
use super::pool::{PoolState, PoolStats, WorkerPool};
use super::registry::Registry;
use super::store::{InMemoryJobStore, JobStore, JobStoreError, StoreStats};
use crate::config::{ConfigError, QueueConfig};

/// Errors surfaced to queue callers.
///
/// Everything that happens after a successful `submit` is recorded on the
/// job itself and observed by polling [`JobQueue::get_job`].
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("no handler registered for job type: {0}")]
    HandlerNotFound(String),
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The pool is stopping or stopped.
    #[error("job queue is closed")]
    Closed,
    #[error("worker pool is {0}")]
    InvalidState(PoolState),
    #[error("worker count must be at least 1")]
    InvalidWorkerCount,
}

/// Submission front door wiring registry, store and worker pool together.
pub struct JobQueue {
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    registry: Arc<Registry>,
    pool: WorkerPool,
}

impl JobQueue {
    /// Queue backed by an [`InMemoryJobStore`].
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        Self::with_store(config, InMemoryJobStore::arc())
    }

    pub fn with_store(config: QueueConfig, store: Arc<dyn JobStore>) -> Result<Self, QueueError> {
        config.validate()?;
        let registry = Arc::new(Registry::new());
        let pool = WorkerPool::new(&config, store.clone(), registry.clone());
        Ok(Self {
            config,
            store,
            registry,
            pool,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Register a handler for a job type. The last registration wins.
    pub fn register_handler<H>(&self, job_type: impl Into<String>, handler: H)
    where
        H: JobHandler,
    {
        let job_type = job_type.into();
        tracing::info!(queue = %self.config.name, job_type = %job_type, "registered handler");
        self.registry.register(job_type, handler);
    }

    pub fn has_handler(&self, job_type: &str) -> bool {
        self.registry.contains(job_type)
    }

    /// Create, persist and enqueue a job.
    ///
    /// Fails synchronously only if no handler is registered for `job_type`
    /// or the queue is closed (nothing is kept then), or if the job cannot be
    /// persisted. Waits while the intake queue is full.
    pub async fn submit(
        &self,
        job_type: &str,
        payload: Payload,
        max_retry: u32,
    ) -> Result<JobId, QueueError> {
        if !self.registry.contains(job_type) {
            return Err(QueueError::HandlerNotFound(job_type.to_string()));
        }

        if !self.pool.state().accepts_jobs() {
            return Err(QueueError::Closed);
        }

        let job = Job::new(job_type, payload, max_retry);
        let job_id = job.id();
        self.store.save(&job)?;
        if let Err(err) = self.pool.submit(job).await {
            // stop began while waiting for buffer space; the caller never sees this id
            if let Err(cleanup) = self.store.delete(job_id) {
                tracing::warn!(
                    queue = %self.config.name,
                    job_id = %job_id,
                    error = %cleanup,
                    "cannot remove rejected job"
                );
            }
            return Err(err);
        }

        tracing::debug!(queue = %self.config.name, job_id = %job_id, job_type, "job submitted");
        Ok(job_id)
    }

    /// Latest persisted snapshot of a job.
    pub fn get_job(&self, job_id: JobId) -> Result<Job, QueueError> {
        self.store
            .get(job_id)?
            .ok_or(QueueError::JobNotFound(job_id))
    }

    pub fn list_jobs(&self, status: JobStatus) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.list_by_status(status)?)
    }

    /// Begin processing with `worker_count` workers.
    pub fn start(&self, worker_count: usize) -> Result<(), QueueError> {
        self.pool.start(worker_count)
    }

    /// Begin processing with the configured worker count.
    pub fn start_default(&self) -> Result<(), QueueError> {
        self.start(self.config.worker_count)
    }

    /// Graceful shutdown; see [`WorkerPool::stop`].
    pub async fn stop(&self) {
        self.pool.stop().await;
    }

    pub fn state(&self) -> PoolState {
        self.pool.state()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn store_stats(&self) -> Result<StoreStats, QueueError> {
        Ok(self.store.stats()?)
    }

    /// The backing store, e.g. for deleting finished jobs.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::handler::JobContext;

    async fn succeed(_ctx: JobContext, _payload: Payload) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = JobQueue::new(QueueConfig::default().with_buffer_size(0)).unwrap_err();
        assert!(matches!(err, QueueError::Config(ConfigError::ZeroBuffer)));
    }

    #[tokio::test]
    async fn submit_requires_handler() {
        let queue = JobQueue::new(QueueConfig::default()).unwrap();
        let err = queue.submit("ghost", Payload::new(), 3).await.unwrap_err();
        assert!(matches!(err, QueueError::HandlerNotFound(ref t) if t == "ghost"));
        assert_eq!(queue.store_stats().unwrap().total(), 0);
    }

    #[tokio::test]
    async fn submit_persists_before_processing() {
        let queue = JobQueue::new(QueueConfig::default()).unwrap();
        queue.register_handler("email", succeed);
        assert!(queue.has_handler("email"));

        let mut payload = Payload::new();
        payload.insert("to".to_string(), serde_json::json!("a@b.c"));
        let job_id = queue.submit("email", payload.clone(), 3).await.unwrap();

        // not started: the snapshot is pending with the payload verbatim
        let job = queue.get_job(job_id).unwrap();
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.payload(), &payload);
        assert_eq!(queue.list_jobs(JobStatus::Pending).unwrap().len(), 1);
        queue.stop().await;
    }

    #[test]
    fn get_unknown_job_is_not_found() {
        let queue = JobQueue::new(QueueConfig::default()).unwrap();
        let id = JobId::new();
        assert!(matches!(queue.get_job(id), Err(QueueError::JobNotFound(found)) if found == id));
    }

    #[tokio::test]
    async fn start_default_uses_configured_workers() {
        let queue = JobQueue::new(QueueConfig::default().with_worker_count(3)).unwrap();
        queue.start_default().unwrap();
        assert_eq!(queue.state(), PoolState::Running);
        assert_eq!(queue.stats().workers, 3);
        queue.stop().await;
        assert_eq!(queue.state(), PoolState::Stopped);
    }
}

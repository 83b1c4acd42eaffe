//! Worker pool: dispatch, retry scheduling and graceful shutdown.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use jobforge_core::{Job, JobError, JobStatus, Payload};

use super::handler::{JobContext, JobHandler};
use super::queue::QueueError;
use super::registry::Registry;
use super::store::JobStore;
use crate::config::QueueConfig;

/// Pool lifecycle. Linear, no re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl PoolState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PoolState::Created,
            1 => PoolState::Running,
            2 => PoolState::Stopping,
            _ => PoolState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PoolState::Created => 0,
            PoolState::Running => 1,
            PoolState::Stopping => 2,
            PoolState::Stopped => 3,
        }
    }

    pub fn accepts_jobs(self) -> bool {
        matches!(self, PoolState::Created | PoolState::Running)
    }
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PoolState::Created => "created",
            PoolState::Running => "running",
            PoolState::Stopping => "stopping",
            PoolState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    /// Jobs that reached `Failed` (budget exhausted or unroutable)
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub handler_panics: u64,
    pub current_running: usize,
    pub pending_retries: usize,
    /// Queued or retry-pending jobs abandoned by `stop`
    pub dropped_at_shutdown: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    workers: AtomicUsize,
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    panics: AtomicU64,
    running: AtomicUsize,
    pending_retries: AtomicUsize,
    dropped: AtomicU64,
}

/// State shared by the pool handle, its workers and retry timers.
struct Shared {
    name: String,
    store: Arc<dyn JobStore>,
    registry: Arc<Registry>,
    intake: mpsc::Sender<Job>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    counters: Counters,
}

/// Fixed set of tokio workers draining one bounded intake queue.
///
/// Every job is received by exactly one worker, which owns it until the
/// outcome is persisted. Failed jobs with retry budget left are re-offered
/// after [`Job::backoff_duration`] by a timer task tracked alongside the
/// workers, so [`WorkerPool::stop`] cannot return while a retry could still
/// fire.
pub struct WorkerPool {
    shared: Arc<Shared>,
    intake_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    state: AtomicU8,
    started_at: OnceLock<Instant>,
}

impl WorkerPool {
    pub fn new(config: &QueueConfig, store: Arc<dyn JobStore>, registry: Arc<Registry>) -> Self {
        let (intake, intake_rx) = mpsc::channel(config.buffer_size.max(1));
        Self {
            shared: Arc::new(Shared {
                name: config.name.clone(),
                store,
                registry,
                intake,
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                counters: Counters::default(),
            }),
            intake_rx: Arc::new(Mutex::new(intake_rx)),
            state: AtomicU8::new(PoolState::Created.as_u8()),
            started_at: OnceLock::new(),
        }
    }

    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The shared cancellation signal handed to every handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Spawn `worker_count` workers. Only valid once, from `Created`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, worker_count: usize) -> Result<(), QueueError> {
        if worker_count == 0 {
            return Err(QueueError::InvalidWorkerCount);
        }
        self.transition(PoolState::Created, PoolState::Running)?;
        let _ = self.started_at.set(Instant::now());
        self.shared
            .counters
            .workers
            .store(worker_count, Ordering::Relaxed);

        for worker in 1..=worker_count {
            let shared = Arc::clone(&self.shared);
            let intake = Arc::clone(&self.intake_rx);
            self.shared.tracker.spawn(worker_loop(shared, intake, worker));
        }

        info!(pool = %self.shared.name, workers = worker_count, "worker pool started");
        Ok(())
    }

    /// Enqueue a job, waiting while the intake queue is full.
    ///
    /// Jobs submitted before `start` stay buffered until workers exist.
    pub async fn submit(&self, job: Job) -> Result<(), QueueError> {
        if !self.state().accepts_jobs() {
            return Err(QueueError::Closed);
        }
        self.shared
            .intake
            .send(job)
            .await
            .map_err(|_| QueueError::Closed)
    }

    /// Graceful shutdown.
    ///
    /// Raises the cancellation signal, waits for every worker to finish the
    /// job in hand and for every retry timer to settle, then closes the
    /// intake queue. Jobs still queued are dropped (they stay `Pending` in
    /// the store). Calling `stop` again is a no-op once stopped.
    pub async fn stop(&self) {
        let began = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match PoolState::from_u8(raw) {
                    PoolState::Stopped => None,
                    _ => Some(PoolState::Stopping.as_u8()),
                }
            });
        if began.is_err() {
            return;
        }
        info!(pool = %self.shared.name, "worker pool stopping");

        self.shared.cancel.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;

        let mut intake = self.intake_rx.lock().await;
        intake.close();
        let mut dropped = 0u64;
        while let Ok(job) = intake.try_recv() {
            debug!(pool = %self.shared.name, job_id = %job.id(), "dropping unstarted job");
            dropped += 1;
        }
        drop(intake);

        if dropped > 0 {
            warn!(pool = %self.shared.name, dropped, "queued jobs left unstarted at shutdown");
            self.shared
                .counters
                .dropped
                .fetch_add(dropped, Ordering::Relaxed);
        }

        self.state
            .store(PoolState::Stopped.as_u8(), Ordering::Release);
        info!(pool = %self.shared.name, "worker pool stopped");
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        PoolStats {
            workers: c.workers.load(Ordering::Relaxed),
            jobs_processed: c.processed.load(Ordering::Relaxed),
            jobs_succeeded: c.succeeded.load(Ordering::Relaxed),
            jobs_failed: c.failed.load(Ordering::Relaxed),
            jobs_retried: c.retried.load(Ordering::Relaxed),
            handler_panics: c.panics.load(Ordering::Relaxed),
            current_running: c.running.load(Ordering::Relaxed),
            pending_retries: c.pending_retries.load(Ordering::Relaxed),
            dropped_at_shutdown: c.dropped.load(Ordering::Relaxed),
            uptime_secs: self
                .started_at
                .get()
                .map_or(0, |t| t.elapsed().as_secs()),
        }
    }

    fn transition(&self, from: PoolState, to: PoolState) -> Result<(), QueueError> {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| QueueError::InvalidState(PoolState::from_u8(current)))
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

async fn worker_loop(shared: Arc<Shared>, intake: Arc<Mutex<mpsc::Receiver<Job>>>, worker: usize) {
    debug!(pool = %shared.name, worker, "worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            job = async { intake.lock().await.recv().await } => job,
        };

        match next {
            Some(job) => shared.process(worker, job).await,
            None => break,
        }
    }

    debug!(pool = %shared.name, worker, "worker stopped");
}

impl Shared {
    async fn process(self: &Arc<Self>, worker: usize, mut job: Job) {
        debug!(
            pool = %self.name,
            worker,
            job_id = %job.id(),
            job_type = job.job_type(),
            attempt = job.attempts() + 1,
            "claimed job"
        );

        let handler = match self.registry.get(job.job_type()) {
            Ok(handler) => handler,
            Err(err) => return self.fail_unroutable(worker, job, err),
        };

        if let Err(err) = job.mark_running() {
            error!(worker, job_id = %job.id(), error = %err, "refusing to run job");
            return;
        }
        if !self.persist(worker, &job) {
            return;
        }

        let ctx = JobContext {
            job_id: job.id(),
            job_type: job.job_type().to_string(),
            attempt: job.attempts(),
            max_retry: job.max_retry(),
            cancellation: self.cancel.clone(),
        };

        self.counters.running.fetch_add(1, Ordering::Relaxed);
        let outcome = self.invoke(handler, ctx, job.payload().clone()).await;
        self.counters.running.fetch_sub(1, Ordering::Relaxed);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(()) => {
                if let Err(err) = job.mark_completed() {
                    error!(worker, job_id = %job.id(), error = %err, "cannot complete job");
                    return;
                }
                self.persist(worker, &job);
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                debug!(worker, job_id = %job.id(), attempt = job.attempts(), "job completed");
            }
            Err(err) => match job.mark_failed(&err) {
                Ok(JobStatus::Pending) => {
                    self.persist(worker, &job);
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        worker,
                        job_id = %job.id(),
                        attempt = job.attempts(),
                        max_retry = job.max_retry(),
                        error = %err,
                        "job failed; retrying"
                    );
                    self.schedule_retry(job);
                }
                Ok(_) => {
                    self.persist(worker, &job);
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        worker,
                        job_id = %job.id(),
                        attempts = job.attempts(),
                        error = %err,
                        "job failed permanently"
                    );
                }
                Err(transition) => {
                    error!(worker, job_id = %job.id(), error = %transition, "cannot record job failure");
                }
            },
        }
    }

    /// A job whose type has no handler fails at once; retrying cannot help.
    fn fail_unroutable(&self, worker: usize, mut job: Job, err: JobError) {
        warn!(worker, job_id = %job.id(), error = %err, "no handler for job");

        let marked = job
            .mark_running()
            .and_then(|()| job.mark_failed_permanently(&err));
        if let Err(transition) = marked {
            error!(worker, job_id = %job.id(), error = %transition, "cannot fail unroutable job");
            return;
        }

        self.persist(worker, &job);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Run the handler inside a panic boundary.
    ///
    /// Errors and panics both come back as `HandlerExecution`; a panic reads
    /// `handler panicked: <message>`.
    async fn invoke(
        &self,
        handler: Arc<dyn JobHandler>,
        ctx: JobContext,
        payload: Payload,
    ) -> Result<(), JobError> {
        let call = async move { handler.handle(ctx, payload).await };
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(JobError::handler_execution(format!("{err:#}"))),
            Err(panic) => {
                self.counters.panics.fetch_add(1, Ordering::Relaxed);
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(JobError::handler_execution(format!(
                    "handler panicked: {message}"
                )))
            }
        }
    }

    /// Persist a transition. Failures are logged, never retried.
    fn persist(&self, worker: usize, job: &Job) -> bool {
        match self.store.update(job) {
            Ok(()) => true,
            Err(err) => {
                error!(
                    worker,
                    job_id = %job.id(),
                    status = %job.status(),
                    error = %err,
                    "failed to persist job"
                );
                false
            }
        }
    }

    /// Re-offer `job` after its backoff without holding up the worker.
    fn schedule_retry(self: &Arc<Self>, job: Job) {
        let delay = job.backoff_duration();
        let job_id = job.id();
        let shared = Arc::clone(self);
        self.counters.pending_retries.fetch_add(1, Ordering::Relaxed);

        self.tracker.spawn(async move {
            let requeued = tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => false,
                _ = tokio::time::sleep(delay) => tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => false,
                    sent = shared.intake.send(job) => sent.is_ok(),
                },
            };

            shared.counters.pending_retries.fetch_sub(1, Ordering::Relaxed);
            if requeued {
                debug!(pool = %shared.name, job_id = %job_id, ?delay, "job re-queued");
            } else {
                shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(pool = %shared.name, job_id = %job_id, "retry dropped at shutdown");
            }
        });
    }
}

//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use jobforge_core::{Job, JobId, JobStatus};

/// Job store abstraction.
///
/// Each call is atomic on its own; there are no multi-key transactions.
/// The store holds snapshots: a worker's in-flight `Job` and the stored copy
/// may differ between a transition and the `update` that persists it.
pub trait JobStore: Send + Sync {
    /// Insert or overwrite a job.
    fn save(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Overwrite an existing job. Fails with `NotFound` if it was never saved.
    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Remove a job. Fails with `NotFound` if absent.
    fn delete(&self, job_id: JobId) -> Result<(), JobStoreError>;

    /// Jobs currently in `status`, oldest first.
    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError>;

    /// Per-status job counts.
    fn stats(&self) -> Result<StoreStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    /// Storage is unusable (a writer panicked while holding the lock).
    #[error("job store lock poisoned")]
    Poisoned,
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }

    fn count(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }
}

/// In-memory job store.
///
/// Instance-owned map behind a single reader/writer lock: writes are
/// exclusive, reads shared.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobStore for InMemoryJobStore {
    fn save(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| JobStoreError::Poisoned)?;
        jobs.insert(job.id(), job.clone());
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| JobStoreError::Poisoned)?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| JobStoreError::Poisoned)?;
        match jobs.get_mut(&job.id()) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id())),
        }
    }

    fn delete(&self, job_id: JobId) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| JobStoreError::Poisoned)?;
        jobs.remove(&job_id)
            .map(|_| ())
            .ok_or(JobStoreError::NotFound(job_id))
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| JobStoreError::Poisoned)?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.status() == status)
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.created_at(), j.id()));
        Ok(result)
    }

    fn stats(&self) -> Result<StoreStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| JobStoreError::Poisoned)?;
        let mut stats = StoreStats::default();
        for job in jobs.values() {
            stats.count(job.status());
        }
        Ok(stats)
    }
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn save(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).save(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id)
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn delete(&self, job_id: JobId) -> Result<(), JobStoreError> {
        (**self).delete(job_id)
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_by_status(status)
    }

    fn stats(&self) -> Result<StoreStats, JobStoreError> {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobforge_core::Payload;
    use proptest::prelude::*;

    fn test_job() -> Job {
        Job::new("test", Payload::new(), 3)
    }

    #[test]
    fn save_and_get() {
        let store = InMemoryJobStore::new();
        let job = test_job();
        store.save(&job).unwrap();

        assert_eq!(store.get(job.id()).unwrap(), Some(job));
        assert_eq!(store.get(JobId::new()).unwrap(), None);
    }

    #[test]
    fn save_overwrites() {
        let store = InMemoryJobStore::new();
        let mut job = test_job();
        store.save(&job).unwrap();

        job.mark_running().unwrap();
        store.save(&job).unwrap();

        let stored = store.get(job.id()).unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Processing);
        assert_eq!(store.stats().unwrap().total(), 1);
    }

    #[test]
    fn update_requires_existing_job() {
        let store = InMemoryJobStore::new();
        let mut job = test_job();

        assert_eq!(store.update(&job), Err(JobStoreError::NotFound(job.id())));

        store.save(&job).unwrap();
        job.mark_running().unwrap();
        store.update(&job).unwrap();
        assert_eq!(store.get(job.id()).unwrap().unwrap().attempts(), 1);
    }

    #[test]
    fn stored_copy_is_independent_of_worker_copy() {
        let store = InMemoryJobStore::new();
        let mut job = test_job();
        store.save(&job).unwrap();

        job.mark_running().unwrap();
        let stored = store.get(job.id()).unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Pending);
    }

    #[test]
    fn delete_removes_job() {
        let store = InMemoryJobStore::new();
        let job = test_job();
        store.save(&job).unwrap();

        store.delete(job.id()).unwrap();
        assert!(store.get(job.id()).unwrap().is_none());
        assert_eq!(store.delete(job.id()), Err(JobStoreError::NotFound(job.id())));
    }

    #[test]
    fn list_by_status_filters_and_orders() {
        let store = InMemoryJobStore::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let job = test_job();
            ids.push(job.id());
            store.save(&job).unwrap();
        }

        let mut running = store.get(ids[1]).unwrap().unwrap();
        running.mark_running().unwrap();
        store.update(&running).unwrap();

        let pending: Vec<JobId> = store
            .list_by_status(JobStatus::Pending)
            .unwrap()
            .iter()
            .map(|j| j.id())
            .collect();
        assert_eq!(pending, vec![ids[0], ids[2]]);
        assert_eq!(store.list_by_status(JobStatus::Processing).unwrap().len(), 1);
        assert!(store.list_by_status(JobStatus::Failed).unwrap().is_empty());
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryJobStore::new();
        for _ in 0..5 {
            store.save(&test_job()).unwrap();
        }

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 5);

        let mut job = store.list_by_status(JobStatus::Pending).unwrap().remove(0);
        job.mark_running().unwrap();
        job.mark_completed().unwrap();
        store.update(&job).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 4);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total(), 5);
    }

    #[test]
    fn works_through_arc_dyn() {
        let store: Arc<dyn JobStore> = InMemoryJobStore::arc();
        let job = test_job();
        store.save(&job).unwrap();
        assert!(store.get(job.id()).unwrap().is_some());
    }

    #[derive(Debug, Clone)]
    enum StoreOp {
        Save(usize),
        Advance(usize),
        Delete(usize),
    }

    fn any_store_op() -> impl Strategy<Value = StoreOp> {
        prop_oneof![
            (0..6usize).prop_map(StoreOp::Save),
            (0..6usize).prop_map(StoreOp::Advance),
            (0..6usize).prop_map(StoreOp::Delete),
        ]
    }

    /// Move a job one step along the happy path.
    fn advance(job: &mut Job) {
        match job.status() {
            JobStatus::Pending => job.mark_running().unwrap(),
            JobStatus::Processing => job.mark_completed().unwrap(),
            JobStatus::Completed | JobStatus::Failed => {}
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn store_matches_a_plain_map(ops in proptest::collection::vec(any_store_op(), 1..60)) {
            let store = InMemoryJobStore::new();
            let mut jobs: Vec<Job> = (0..6).map(|_| test_job()).collect();
            let mut model: HashMap<JobId, Job> = HashMap::new();

            for op in ops {
                match op {
                    StoreOp::Save(i) => {
                        store.save(&jobs[i]).unwrap();
                        model.insert(jobs[i].id(), jobs[i].clone());
                    }
                    StoreOp::Advance(i) => {
                        advance(&mut jobs[i]);
                        let result = store.update(&jobs[i]);
                        if model.contains_key(&jobs[i].id()) {
                            prop_assert!(result.is_ok());
                            model.insert(jobs[i].id(), jobs[i].clone());
                        } else {
                            prop_assert_eq!(result, Err(JobStoreError::NotFound(jobs[i].id())));
                        }
                    }
                    StoreOp::Delete(i) => {
                        let expected = if model.remove(&jobs[i].id()).is_some() {
                            Ok(())
                        } else {
                            Err(JobStoreError::NotFound(jobs[i].id()))
                        };
                        prop_assert_eq!(store.delete(jobs[i].id()), expected);
                    }
                }
            }

            for job in &jobs {
                prop_assert_eq!(store.get(job.id()).unwrap(), model.get(&job.id()).cloned());
            }

            let stats = store.stats().unwrap();
            prop_assert_eq!(stats.total(), model.len());
            for status in JobStatus::ALL {
                let listed = store.list_by_status(status).unwrap();
                let expected = model.values().filter(|j| j.status() == status).count();
                prop_assert_eq!(listed.len(), expected);
                let keys: Vec<_> = listed.iter().map(|j| (j.created_at(), j.id())).collect();
                prop_assert!(keys.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }
}

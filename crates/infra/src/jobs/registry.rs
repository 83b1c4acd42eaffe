//! Job type -> handler lookup table.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use jobforge_core::JobError;

use super::handler::JobHandler;

/// Thread-safe handler registry.
///
/// Readers share the lock; `register` takes it exclusively, so a lookup
/// never observes a half-written entry. A poisoned lock is recovered: the
/// map is only ever mutated by a single `insert`.
#[derive(Default)]
pub struct Registry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type. The last registration wins.
    pub fn register<H>(&self, job_type: impl Into<String>, handler: H)
    where
        H: JobHandler,
    {
        self.register_arc(job_type, Arc::new(handler));
    }

    pub fn register_arc(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let job_type = job_type.into();
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.insert(job_type.clone(), handler).is_some() {
            tracing::debug!(job_type = %job_type, "replaced job handler");
        }
    }

    pub fn get(&self, job_type: &str) -> Result<Arc<dyn JobHandler>, JobError> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers
            .get(job_type)
            .cloned()
            .ok_or_else(|| JobError::handler_not_found(job_type))
    }

    pub fn contains(&self, job_type: &str) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut types: Vec<String> = handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::handler::JobContext;
    use jobforge_core::{JobId, Payload};
    use tokio_util::sync::CancellationToken;

    fn test_ctx(job_type: &str) -> JobContext {
        JobContext {
            job_id: JobId::new(),
            job_type: job_type.to_string(),
            attempt: 1,
            max_retry: 1,
            cancellation: CancellationToken::new(),
        }
    }

    fn ok_handler() -> impl JobHandler {
        |_ctx: JobContext, _payload: Payload| async { anyhow::Ok(()) }
    }

    async fn smtp_down(_ctx: JobContext, _payload: Payload) -> anyhow::Result<()> {
        anyhow::bail!("smtp down")
    }

    #[tokio::test]
    async fn get_returns_registered_handler() {
        let registry = Registry::new();
        registry.register("email", smtp_down);

        let handler = registry.get("email").unwrap();
        let err = handler
            .handle(test_ctx("email"), Payload::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "smtp down");
    }

    #[test]
    fn unknown_type_is_handler_not_found() {
        let registry = Registry::new();
        match registry.get("ghost") {
            Err(JobError::HandlerNotFound(t)) => assert_eq!(t, "ghost"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected HandlerNotFound"),
        }
        assert!(!registry.contains("ghost"));
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = Registry::new();
        registry.register("report", smtp_down);
        registry.register("report", ok_handler());

        assert_eq!(registry.len(), 1);
        let handler = registry.get("report").unwrap();
        assert!(handler.handle(test_ctx("report"), Payload::new()).await.is_ok());
    }

    #[test]
    fn job_types_are_sorted() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        registry.register("b", ok_handler());
        registry.register("a", ok_handler());
        registry.register("c", ok_handler());
        assert_eq!(registry.job_types(), vec!["a", "b", "c"]);
    }

    #[test]
    fn concurrent_register_and_get() {
        let registry = Arc::new(Registry::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for n in 0..50 {
                        let job_type = format!("type-{}", (i * 50 + n) % 20);
                        registry.register(job_type.clone(), ok_handler());
                        assert!(registry.get(&job_type).is_ok());
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(registry.len(), 20);
    }
}

//! Queue configuration.

use serde::Deserialize;
use thiserror::Error;

/// Default number of concurrent workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default capacity of the intake queue. Submitters block once it is full.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

pub const WORKERS_ENV: &str = "JOBFORGE_WORKERS";
pub const BUFFER_SIZE_ENV: &str = "JOBFORGE_BUFFER_SIZE";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker_count must be at least 1")]
    ZeroWorkers,
    #[error("buffer_size must be at least 1")]
    ZeroBuffer,
}

/// Job queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name for logging
    pub name: String,
    /// Workers spawned by `JobQueue::start_default`
    pub worker_count: usize,
    /// Intake queue capacity (backpressure threshold)
    pub buffer_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "jobforge".to_string(),
            worker_count: DEFAULT_WORKER_COUNT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl QueueConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBuffer);
        }
        Ok(())
    }

    /// Defaults overridden by `JOBFORGE_WORKERS` / `JOBFORGE_BUFFER_SIZE`.
    ///
    /// Unparsable or zero values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(n) = parse_positive(&lookup, WORKERS_ENV) {
            cfg.worker_count = n;
        }
        if let Some(n) = parse_positive(&lookup, BUFFER_SIZE_ENV) {
            cfg.buffer_size = n;
        }
        cfg
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %raw, "ignoring invalid queue setting; using default");
            None
        }
    }
}

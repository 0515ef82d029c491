//! Worker pool configuration.

use crate::error::StrandError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings handed to [`WorkerPool::initialize`](super::WorkerPool::initialize).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers, fixed for the life of the pool.
    pub workers: usize,
    /// Script the engine runs for every request (`SCRIPT_NAME`).
    pub handler: String,
    /// How long initialization waits for every worker to become idle.
    pub init_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            handler: "index".to_string(),
            init_timeout_ms: 10_000,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the handler path.
    pub fn handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = handler.into();
        self
    }

    /// Set the initialization timeout.
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn init_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), StrandError> {
        if self.workers == 0 {
            return Err(StrandError::Config("workers must be at least 1".into()));
        }
        if self.workers > i32::MAX as usize {
            return Err(StrandError::Config(format!(
                "too many workers: {}",
                self.workers
            )));
        }
        if self.handler.is_empty() {
            return Err(StrandError::Config("handler must not be empty".into()));
        }
        Ok(())
    }
}

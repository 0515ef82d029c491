//! Server configuration.

use crate::error::StrandError;
use crate::pool::PoolConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the HTTP front end and its worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrandConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
    /// Maximum response body size in bytes.
    pub max_response_size: usize,
    /// How long to wait for open connections on shutdown.
    pub shutdown_timeout_ms: u64,
    /// Path answering with pool statistics, if any.
    pub status_path: Option<String>,
    /// Worker pool settings.
    pub pool: PoolConfig,
}

impl Default for StrandConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_size: 10 * 1024 * 1024, // 10MB
            max_response_size: 64 * 1024 * 1024,
            shutdown_timeout_ms: 30_000,
            status_path: None,
            pool: PoolConfig::default(),
        }
    }
}

impl StrandConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StrandError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Set the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the worker count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.pool.workers = workers;
        self
    }

    /// Set the handler path.
    pub fn handler(mut self, handler: impl Into<String>) -> Self {
        self.pool.handler = handler.into();
        self
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Serve pool statistics as JSON on `path`.
    pub fn status_path(mut self, path: impl Into<String>) -> Self {
        self.status_path = Some(path.into());
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), StrandError> {
        if let Some(path) = &self.status_path {
            if !path.starts_with('/') {
                return Err(StrandError::Config(format!(
                    "status_path must start with '/': {}",
                    path
                )));
            }
        }
        self.pool.validate()
    }
}

//! Error types for the pool and the engine boundary.

use crate::pool::WorkerId;
use std::fmt;

/// Errors surfaced by pool initialization, dispatch and shutdown.
///
/// Problems inside a single request (bad callback lines, transport write
/// failures, unknown worker ids) are absorbed and logged, never returned.
#[derive(Debug)]
pub enum StrandError {
    /// Not every worker reached Idle before the initialization deadline.
    InitTimeout { ready: usize, expected: usize },
    /// A worker's per-thread engine setup failed.
    WorkerStart { worker: WorkerId, reason: String },
    /// The OS refused to start a worker thread.
    Spawn(std::io::Error),
    /// The pool no longer accepts dispatches.
    ShuttingDown,
    /// Every worker has failed; nothing is left to serve requests.
    NoWorkers,
    /// A worker taken from the idle queue was not Idle.
    WorkerBusy(WorkerId),
    /// A worker stopped without reporting the outcome of its request.
    WorkerLost(WorkerId),
    /// `shutdown` was called more than once.
    AlreadyShutdown,
    /// Invalid configuration.
    Config(String),
    Io(std::io::Error),
    Engine(EngineError),
}

impl fmt::Display for StrandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrandError::InitTimeout { ready, expected } => write!(
                f,
                "timed out waiting for workers: {} of {} ready",
                ready, expected
            ),
            StrandError::WorkerStart { worker, reason } => {
                write!(f, "worker {} failed to start: {}", worker, reason)
            }
            StrandError::Spawn(err) => write!(f, "failed to spawn worker thread: {}", err),
            StrandError::ShuttingDown => write!(f, "worker pool is shutting down"),
            StrandError::NoWorkers => write!(f, "no live workers left in the pool"),
            StrandError::WorkerBusy(worker) => {
                write!(f, "worker {} was handed a request while busy", worker)
            }
            StrandError::WorkerLost(worker) => {
                write!(f, "worker {} exited without completing its request", worker)
            }
            StrandError::AlreadyShutdown => write!(f, "worker pool was already shut down"),
            StrandError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            StrandError::Io(err) => write!(f, "{}", err),
            StrandError::Engine(err) => write!(f, "engine error: {}", err),
        }
    }
}

impl std::error::Error for StrandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StrandError::Spawn(err) | StrandError::Io(err) => Some(err),
            StrandError::Engine(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StrandError {
    fn from(err: std::io::Error) -> Self {
        StrandError::Io(err)
    }
}

impl From<serde_json::Error> for StrandError {
    fn from(err: serde_json::Error) -> Self {
        StrandError::Config(err.to_string())
    }
}

impl From<EngineError> for StrandError {
    fn from(err: EngineError) -> Self {
        StrandError::Engine(err)
    }
}

/// Failure reported by, or detected around, an engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::new(err.to_string())
    }
}

impl From<libloading::Error> for EngineError {
    fn from(err: libloading::Error) -> Self {
        EngineError::new(err.to_string())
    }
}

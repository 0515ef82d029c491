//! The engine boundary.
//!
//! An engine is an opaque, non-reentrant callee. The pool calls
//! [`Engine::execute`] on a worker's own thread, passing only scalars and
//! flat buffers, and the engine answers through the [`Bridge`] callbacks
//! before the call returns. No other call into the engine happens on that
//! thread until `execute` returns, and a given worker always calls from the
//! same OS thread, so engines may keep thread-local state.

mod dylib;

pub use dylib::DylibEngine;

use crate::bridge::Bridge;
use crate::error::EngineError;
use crate::pool::WorkerId;

/// Scalar description of one request.
#[derive(Debug, Clone, Copy)]
pub struct EngineCall<'a> {
    /// Worker executing the call; pass it back on every callback.
    pub worker: WorkerId,
    /// `major * 1000 + minor`.
    pub protocol: i32,
    pub method: &'a str,
    /// Raw request target.
    pub target: &'a str,
    /// Raw query string without `?`.
    pub query: &'a str,
    /// Request headers in the key-value wire format.
    pub headers: &'a [u8],
    /// CGI-style environment in the key-value wire format.
    pub environment: &'a [u8],
}

/// A script engine driven by the worker pool.
pub trait Engine: Send + Sync + 'static {
    /// Per-thread setup, run on the worker's thread before it goes idle.
    fn start_worker(&self, worker: WorkerId) -> Result<(), EngineError> {
        let _ = worker;
        Ok(())
    }

    /// Run one request to completion.
    fn execute(&self, call: &EngineCall<'_>, bridge: &Bridge) -> Result<(), EngineError>;

    /// Per-thread teardown, run on the worker's thread when it exits.
    fn stop_worker(&self, worker: WorkerId) {
        let _ = worker;
    }

    /// Process-wide teardown after every worker has exited.
    fn shutdown(&self) {}
}

/// Engine backed by a closure.
pub struct FnEngine<F> {
    f: F,
}

impl<F> Engine for FnEngine<F>
where
    F: Fn(&EngineCall<'_>, &Bridge) -> Result<(), EngineError> + Send + Sync + 'static,
{
    fn execute(&self, call: &EngineCall<'_>, bridge: &Bridge) -> Result<(), EngineError> {
        (self.f)(call, bridge)
    }
}

/// Wrap a closure as an [`Engine`].
pub fn engine_fn<F>(f: F) -> FnEngine<F>
where
    F: Fn(&EngineCall<'_>, &Bridge) -> Result<(), EngineError> + Send + Sync + 'static,
{
    FnEngine { f }
}

//! # Strand - thread-affine dispatch for non-reentrant script engines
//!
//! Strand lets a concurrent HTTP front end drive a script engine that must
//! run every request on the same OS thread for its whole life and can only
//! run one request per thread at a time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                 HTTP front end (hyper, tokio tasks)                 │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │ dispatch (spawn_blocking)
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            WorkerPool                               │
//! │   IdleQueue ──▶ ┌──────────┐  ┌──────────┐  ┌──────────┐            │
//! │                 │ worker 0 │  │ worker 1 │  │   ...    │  OS threads│
//! │                 └──────────┘  └──────────┘  └──────────┘            │
//! └─────────────────────────────────────────────────────────────────────┘
//!                   │ Engine::execute            ▲ Bridge callbacks
//!                   ▼                            │
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │               Engine (closure or shared library)                    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strand::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), StrandError> {
//!     let engine = engine_fn(|call, bridge| {
//!         bridge.emit_line(call.worker, b"HTTP/1.1 200 OK");
//!         bridge.emit_line(call.worker, b"Content-Type: text/plain");
//!         bridge.write_body(call.worker, b"hello from strand");
//!         Ok(())
//!     });
//!
//!     let config = StrandConfig::new().port(8080).workers(4);
//!     let server = StrandServer::new(config, Arc::new(engine))?;
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! ## Request lifecycle
//!
//! 1. **Dispatch**: an idle worker is taken from the queue; callers block
//!    while every worker is busy.
//! 2. **Execute**: on the worker's thread, headers and a CGI-style
//!    environment are marshalled and the engine is called synchronously.
//! 3. **Callbacks**: the engine emits status and header lines, writes body
//!    bytes and pulls the request body through the [`Bridge`].
//! 4. **Finalize**: the response is committed (200 by default, 500 if the
//!    engine failed), an access log line is written and the worker goes
//!    back to the idle queue.

pub mod bridge;
pub mod engine;
pub mod error;
pub mod http;
pub mod marshal;
pub mod pool;
pub mod runtime;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::bridge::Bridge;
    pub use crate::engine::{engine_fn, DylibEngine, Engine, EngineCall};
    pub use crate::error::{EngineError, StrandError};
    pub use crate::http::{BufferedResponse, Request, ResponseSink};
    pub use crate::pool::{DispatchOutcome, PoolConfig, WorkerId, WorkerPool};
    pub use crate::runtime::{StrandConfig, StrandServer};
}

// Re-export for convenience
pub use bridge::Bridge;
pub use engine::{engine_fn, Engine, EngineCall};
pub use error::{EngineError, StrandError};
pub use pool::{PoolConfig, WorkerId, WorkerPool};
pub use runtime::{StrandConfig, StrandServer};

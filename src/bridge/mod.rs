//! Output bridge: the callbacks an engine uses while executing a request.
//!
//! Every callback names the worker it is meant for. The id is resolved in
//! the pool's immutable worker table; the per-request state itself lives in
//! a thread-local on the worker's own thread, so a callback only succeeds
//! when it runs on the thread that owns the request. Unknown ids and
//! callbacks from the wrong thread are logged and ignored.

mod line;
mod pending;

pub use line::{parse_line, ProtocolLine};
pub use pending::{PendingResponse, ResponsePhase, DEFAULT_STATUS, FAILURE_STATUS};

use crate::http::{BodyReader, ResponseSink};
use crate::pool::{WorkerId, WorkerTable};
use bytes::BytesMut;
use std::cell::RefCell;
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use tracing::{error, info, warn};

thread_local! {
    static ACTIVE: RefCell<Option<ActiveRequest>> = const { RefCell::new(None) };
}

/// State of the request a worker thread is currently executing.
pub(crate) struct ActiveRequest {
    pub(crate) worker: WorkerId,
    pub(crate) sink: Box<dyn ResponseSink>,
    pub(crate) body: BodyReader,
    pub(crate) response: PendingResponse,
    pub(crate) scratch: BytesMut,
}

impl ActiveRequest {
    pub(crate) fn new(
        worker: WorkerId,
        sink: Box<dyn ResponseSink>,
        body: BodyReader,
        scratch: BytesMut,
    ) -> Self {
        Self {
            worker,
            sink,
            body,
            response: PendingResponse::new(),
            scratch,
        }
    }

    /// Make this the current thread's in-flight request.
    pub(crate) fn install(self) {
        ACTIVE.with(|cell| {
            let previous = cell.borrow_mut().replace(self);
            if let Some(previous) = previous {
                error!(
                    "Worker {} still had a request installed on this thread",
                    previous.worker
                );
            }
        });
    }

    /// Remove the current thread's in-flight request.
    pub(crate) fn take() -> Option<ActiveRequest> {
        ACTIVE.with(|cell| cell.borrow_mut().take())
    }
}

/// Handle through which an engine reports output and pulls request bodies.
#[derive(Clone)]
pub struct Bridge {
    table: Arc<WorkerTable>,
}

impl Bridge {
    pub(crate) fn new(table: Arc<WorkerTable>) -> Self {
        Self { table }
    }

    /// A raw status or header line.
    ///
    /// Status lines are held until the first body write or the end of the
    /// request; header lines are applied immediately. Other lines are ignored.
    pub fn emit_line(&self, worker: WorkerId, line: &[u8]) {
        self.with_request(worker, "emit_line", |active| match parse_line(line) {
            ProtocolLine::Status(code) => active.response.set_status(code),
            ProtocolLine::Header { name, value } => {
                active.response.set_header(active.sink.as_mut(), name, value)
            }
            ProtocolLine::Other => {}
        });
    }

    /// Body bytes. Returns the number of bytes the transport accepted.
    pub fn write_body(&self, worker: WorkerId, data: &[u8]) -> usize {
        self.with_request(worker, "write_body", |active| {
            active.response.write(active.sink.as_mut(), data)
        })
        .unwrap_or(0)
    }

    /// Fill up to `buf.len()` bytes of request body. Returns 0 at end of body.
    pub fn read_body(&self, worker: WorkerId, buf: &mut [u8]) -> usize {
        self.with_request(worker, "read_body", |active| {
            let scratch = &mut active.scratch;
            scratch.clear();
            scratch.resize(buf.len(), 0);

            let mut filled = 0;
            while filled < buf.len() {
                match active.body.read(&mut scratch[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!("Worker {}: request body read failed: {}", worker, err);
                        break;
                    }
                }
            }
            buf[..filled].copy_from_slice(&scratch[..filled]);
            filled
        })
        .unwrap_or(0)
    }

    /// A log message with a syslog severity.
    pub fn log(&self, worker: WorkerId, message: &str, severity: i32) {
        if self.table.get(worker).is_none() {
            warn!("log: unknown worker id {}", worker);
            return;
        }
        if strand_sdk::severity::is_informational(severity) {
            info!(target: "strand::engine", worker = %worker, "{}", message);
        } else {
            error!(target: "strand::engine", worker = %worker, "{}", message);
        }
    }

    fn with_request<R>(
        &self,
        worker: WorkerId,
        op: &'static str,
        f: impl FnOnce(&mut ActiveRequest) -> R,
    ) -> Option<R> {
        if self.table.get(worker).is_none() {
            warn!("{}: unknown worker id {}", op, worker);
            return None;
        }
        ACTIVE.with(|cell| {
            let Ok(mut guard) = cell.try_borrow_mut() else {
                warn!("{}: reentrant callback for worker {}", op, worker);
                return None;
            };
            match guard.as_mut() {
                Some(active) if active.worker == worker => Some(f(active)),
                _ => {
                    warn!("{}: worker {} has no request on this thread", op, worker);
                    None
                }
            }
        })
    }
}

//! Per-request response state.
//!
//! Engines emit headers, the status line and body bytes as separate calls in
//! whatever order they like, while the transport needs headers, then the
//! status, then the body. The phase machine below absorbs the difference:
//!
//! ```text
//! HeadersOpen ──status line──▶ StatusPending ──first body write / end──▶ Committed
//!      └───────────────────────first body write / end─────────────────────┘
//! ```
//!
//! Header lines are applied to the sink immediately while the response is not
//! yet committed; the status is held back until it has to be flushed.

use crate::http::ResponseSink;
use tracing::{debug, error};

/// Status used when a response is committed without an explicit status.
pub const DEFAULT_STATUS: u16 = 200;

/// Status used when the engine fails before committing anything.
pub const FAILURE_STATUS: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePhase {
    /// Nothing sent; headers may still change.
    HeadersOpen,
    /// A status line was received but not yet flushed.
    StatusPending(u16),
    /// Status and headers are on the wire.
    Committed(u16),
}

#[derive(Debug)]
pub struct PendingResponse {
    phase: ResponsePhase,
    bytes_written: u64,
}

impl PendingResponse {
    pub fn new() -> Self {
        Self {
            phase: ResponsePhase::HeadersOpen,
            bytes_written: 0,
        }
    }

    pub fn phase(&self) -> ResponsePhase {
        self.phase
    }

    /// Status recorded so far, 0 if none was set.
    pub fn status_code(&self) -> u16 {
        match self.phase {
            ResponsePhase::HeadersOpen => 0,
            ResponsePhase::StatusPending(code) | ResponsePhase::Committed(code) => code,
        }
    }

    pub fn headers_committed(&self) -> bool {
        matches!(self.phase, ResponsePhase::Committed(_))
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Record a status to be flushed later. Ignored once committed.
    pub fn set_status(&mut self, code: u16) {
        match self.phase {
            ResponsePhase::Committed(sent) => {
                debug!("Ignoring status {} after {} was committed", code, sent)
            }
            _ => self.phase = ResponsePhase::StatusPending(code),
        }
    }

    /// Apply a header. Ignored once committed.
    pub fn set_header(&mut self, sink: &mut dyn ResponseSink, name: &str, value: &[u8]) {
        if self.headers_committed() {
            debug!("Ignoring header {} after the response was committed", name);
            return;
        }
        sink.set_header(name, value);
    }

    /// Flush the status line if that has not happened yet.
    pub fn commit(&mut self, sink: &mut dyn ResponseSink) -> u16 {
        let status = match self.phase {
            ResponsePhase::Committed(status) => return status,
            ResponsePhase::StatusPending(status) => status,
            ResponsePhase::HeadersOpen => DEFAULT_STATUS,
        };
        sink.write_head(status);
        self.phase = ResponsePhase::Committed(status);
        status
    }

    /// Write body bytes, committing first. Returns the accepted byte count.
    pub fn write(&mut self, sink: &mut dyn ResponseSink, data: &[u8]) -> usize {
        self.commit(sink);
        match sink.write_body(data) {
            Ok(n) => {
                self.bytes_written += n as u64;
                n
            }
            Err(err) => {
                error!("Response write failed after {} bytes: {}", self.bytes_written, err);
                0
            }
        }
    }

    /// End of request: flush a status that was never forced by a body write.
    pub fn finish(&mut self, sink: &mut dyn ResponseSink) -> u16 {
        self.commit(sink)
    }

    /// End of a failed request: report 500 unless something was committed.
    pub fn fail(&mut self, sink: &mut dyn ResponseSink) -> u16 {
        if !self.headers_committed() {
            self.phase = ResponsePhase::StatusPending(FAILURE_STATUS);
        }
        self.commit(sink)
    }
}

impl Default for PendingResponse {
    fn default() -> Self {
        Self::new()
    }
}

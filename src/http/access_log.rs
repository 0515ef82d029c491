//! NCSA Common Log Format access log.

use chrono::{DateTime, FixedOffset, Local};
use std::fmt;

/// One access log record, written after the response is finalized.
#[derive(Debug, Clone)]
pub struct AccessLogEntry<'a> {
    pub remote_addr: &'a str,
    pub time: DateTime<FixedOffset>,
    pub method: &'a str,
    pub target: &'a str,
    pub protocol: &'a str,
    pub status: u16,
    pub bytes: u64,
}

impl<'a> AccessLogEntry<'a> {
    /// Entry stamped with the current local time.
    pub fn now(
        remote_addr: &'a str,
        method: &'a str,
        target: &'a str,
        protocol: &'a str,
        status: u16,
        bytes: u64,
    ) -> Self {
        Self {
            remote_addr,
            time: Local::now().fixed_offset(),
            method,
            target,
            protocol,
            status,
            bytes,
        }
    }

    pub fn emit(&self) {
        tracing::info!(target: "strand::access", "{}", self);
    }
}

impl fmt::Display for AccessLogEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let remote = if self.remote_addr.is_empty() {
            "-"
        } else {
            self.remote_addr
        };
        write!(
            f,
            "{} - - [{}] \"{} {} {}\" {} {}",
            remote,
            self.time.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.target,
            self.protocol,
            self.status,
            self.bytes
        )
    }
}

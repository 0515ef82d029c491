//! Shared contract between the strand host and a script engine.
//!
//! The host and the engine only exchange scalars and flat byte buffers.
//! Structured data (request headers, environment variables) crosses the
//! boundary in the key-value wire format implemented in [`kv`]; the engine
//! entry points and the callback table live in [`abi`].

pub mod abi;
pub mod kv;

pub use abi::{StrandCallbacks, StrandRequest, StrandSlice};
pub use kv::{decode, encode, encode_into, pairs, DecodeError, KeyValue, Pairs};

/// Syslog severities as reported by engine log callbacks (see `sys/syslog.h`).
pub mod severity {
    pub const LOG_EMERG: i32 = 0;
    pub const LOG_ALERT: i32 = 1;
    pub const LOG_CRIT: i32 = 2;
    pub const LOG_ERR: i32 = 3;
    pub const LOG_WARNING: i32 = 4;
    pub const LOG_NOTICE: i32 = 5;
    pub const LOG_INFO: i32 = 6;
    pub const LOG_DEBUG: i32 = 7;

    /// Messages at or above this value go to the informational sink.
    pub const INFO_THRESHOLD: i32 = LOG_NOTICE;

    /// Whether a message of this severity belongs in the informational sink.
    pub fn is_informational(severity: i32) -> bool {
        severity >= INFO_THRESHOLD
    }
}

//! C ABI for engines loaded as shared libraries.
//!
//! An engine library exports:
//!
//! ```text
//! int strand_engine_init(StrandSlice handler, const StrandCallbacks *callbacks);
//! int strand_engine_request(const StrandRequest *request);
//! int strand_engine_deinit(void);
//! int strand_engine_thread_start(int worker_id);   // optional
//! void strand_engine_thread_stop(int worker_id);   // optional
//! ```
//!
//! `strand_engine_request` runs the whole request synchronously on the
//! calling thread and reports output through the callbacks, passing back the
//! `worker_id` it was given. All pointers are only valid for the duration of
//! the call that received them. Entry points return 0 on success.

use std::os::raw::c_int;

pub const ENTRY_INIT: &[u8] = b"strand_engine_init\0";
pub const ENTRY_REQUEST: &[u8] = b"strand_engine_request\0";
pub const ENTRY_DEINIT: &[u8] = b"strand_engine_deinit\0";
pub const ENTRY_THREAD_START: &[u8] = b"strand_engine_thread_start\0";
pub const ENTRY_THREAD_STOP: &[u8] = b"strand_engine_thread_stop\0";

/// Borrowed byte range.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StrandSlice {
    pub ptr: *const u8,
    pub len: usize,
}

impl StrandSlice {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes for the returned lifetime.
    pub unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        if self.ptr.is_null() || self.len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.ptr, self.len)
        }
    }
}

/// Scalar request description handed to `strand_engine_request`.
///
/// `headers` and `environment` are key-value buffers (see [`crate::kv`]).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StrandRequest {
    pub worker_id: c_int,
    /// `major * 1000 + minor`, e.g. 1001 for HTTP/1.1.
    pub protocol: c_int,
    pub method: StrandSlice,
    pub target: StrandSlice,
    pub query: StrandSlice,
    pub headers: StrandSlice,
    pub environment: StrandSlice,
}

/// Host callbacks, addressed by worker id.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct StrandCallbacks {
    /// One raw status or header line, e.g. `HTTP/1.1 200 OK` or `Content-Type: text/html`.
    pub emit_line: unsafe extern "C" fn(worker_id: c_int, line: *const u8, len: usize),
    /// Body bytes; returns how many bytes the transport accepted.
    pub write_body: unsafe extern "C" fn(worker_id: c_int, data: *const u8, len: usize) -> usize,
    /// Fills up to `len` bytes of request body into `buf`; 0 means end of body.
    pub read_body: unsafe extern "C" fn(worker_id: c_int, buf: *mut u8, len: usize) -> usize,
    /// Log message with a syslog severity.
    pub log_message:
        unsafe extern "C" fn(worker_id: c_int, message: *const u8, len: usize, severity: c_int),
}

pub type InitFn = unsafe extern "C" fn(handler: StrandSlice, callbacks: *const StrandCallbacks) -> c_int;
pub type RequestFn = unsafe extern "C" fn(request: *const StrandRequest) -> c_int;
pub type DeinitFn = unsafe extern "C" fn() -> c_int;
pub type ThreadStartFn = unsafe extern "C" fn(worker_id: c_int) -> c_int;
pub type ThreadStopFn = unsafe extern "C" fn(worker_id: c_int);

//! Engine loaded from a shared library implementing the `strand_sdk::abi`
//! entry points.

use super::{Engine, EngineCall};
use crate::bridge::Bridge;
use crate::error::EngineError;
use crate::pool::WorkerId;
use libloading::Library;
use std::cell::RefCell;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use strand_sdk::abi::{
    self, DeinitFn, InitFn, RequestFn, StrandCallbacks, StrandRequest, StrandSlice,
    ThreadStartFn, ThreadStopFn,
};
use tracing::{info, warn};

thread_local! {
    // Bridge of the request currently executing on this thread.
    static CURRENT_BRIDGE: RefCell<Option<Bridge>> = const { RefCell::new(None) };
}

static CALLBACKS: StrandCallbacks = StrandCallbacks {
    emit_line: emit_line_trampoline,
    write_body: write_body_trampoline,
    read_body: read_body_trampoline,
    log_message: log_message_trampoline,
};

/// Engine living in a shared library.
pub struct DylibEngine {
    path: PathBuf,
    request: RequestFn,
    deinit: DeinitFn,
    thread_start: Option<ThreadStartFn>,
    thread_stop: Option<ThreadStopFn>,
    deinitialized: AtomicBool,
    // Keeps the entry points above valid.
    _library: Library,
}

impl DylibEngine {
    /// Load the library at `path` and initialize it for `handler`.
    pub fn load(path: impl AsRef<Path>, handler: &str) -> Result<Self, EngineError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::new(format!(
                "Engine library not found at {}",
                path.display()
            )));
        }

        // SAFETY: the library is trusted to implement the strand ABI; the
        // resolved entry points are only used while `_library` is alive.
        unsafe {
            let library = Library::new(path).map_err(|e| {
                EngineError::new(format!(
                    "Failed to load engine library '{}': {}",
                    path.display(),
                    e
                ))
            })?;

            let init = *library.get::<InitFn>(abi::ENTRY_INIT)?;
            let request = *library.get::<RequestFn>(abi::ENTRY_REQUEST)?;
            let deinit = *library.get::<DeinitFn>(abi::ENTRY_DEINIT)?;
            let thread_start = library
                .get::<ThreadStartFn>(abi::ENTRY_THREAD_START)
                .ok()
                .map(|symbol| *symbol);
            let thread_stop = library
                .get::<ThreadStopFn>(abi::ENTRY_THREAD_STOP)
                .ok()
                .map(|symbol| *symbol);

            let status = init(StrandSlice::new(handler.as_bytes()), &CALLBACKS);
            if status != 0 {
                return Err(EngineError::new(format!(
                    "strand_engine_init returned {} for '{}'",
                    status,
                    path.display()
                )));
            }
            info!("Loaded engine {} for handler {}", path.display(), handler);

            Ok(Self {
                path: path.to_path_buf(),
                request,
                deinit,
                thread_start,
                thread_stop,
                deinitialized: AtomicBool::new(false),
                _library: library,
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Engine for DylibEngine {
    fn start_worker(&self, worker: WorkerId) -> Result<(), EngineError> {
        let Some(thread_start) = self.thread_start else {
            return Ok(());
        };
        // SAFETY: entry point resolved from the loaded library.
        match unsafe { thread_start(worker.as_raw()) } {
            0 => Ok(()),
            status => Err(EngineError::new(format!(
                "strand_engine_thread_start returned {}",
                status
            ))),
        }
    }

    fn execute(&self, call: &EngineCall<'_>, bridge: &Bridge) -> Result<(), EngineError> {
        let request = StrandRequest {
            worker_id: call.worker.as_raw(),
            protocol: call.protocol,
            method: StrandSlice::new(call.method.as_bytes()),
            target: StrandSlice::new(call.target.as_bytes()),
            query: StrandSlice::new(call.query.as_bytes()),
            headers: StrandSlice::new(call.headers),
            environment: StrandSlice::new(call.environment),
        };

        let _scope = BridgeScope::enter(bridge.clone());
        // SAFETY: `request` and the buffers it points to outlive the call.
        match unsafe { (self.request)(&request) } {
            0 => Ok(()),
            status => Err(EngineError::new(format!(
                "strand_engine_request returned {}",
                status
            ))),
        }
    }

    fn stop_worker(&self, worker: WorkerId) {
        if let Some(thread_stop) = self.thread_stop {
            // SAFETY: entry point resolved from the loaded library.
            unsafe { thread_stop(worker.as_raw()) }
        }
    }

    fn shutdown(&self) {
        if self.deinitialized.swap(true, Ordering::SeqCst) {
            return;
        }
        // SAFETY: called once, after every worker thread has exited.
        let status = unsafe { (self.deinit)() };
        if status != 0 {
            warn!("strand_engine_deinit returned {}", status);
        }
    }
}

impl Drop for DylibEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Installs the bridge for the duration of one engine call.
struct BridgeScope;

impl BridgeScope {
    fn enter(bridge: Bridge) -> Self {
        CURRENT_BRIDGE.with(|cell| *cell.borrow_mut() = Some(bridge));
        BridgeScope
    }
}

impl Drop for BridgeScope {
    fn drop(&mut self) {
        CURRENT_BRIDGE.with(|cell| *cell.borrow_mut() = None);
    }
}

fn with_bridge<R: Default>(worker_id: c_int, f: impl FnOnce(&Bridge, WorkerId) -> R) -> R {
    let Some(worker) = WorkerId::from_raw(worker_id as i64) else {
        warn!("Engine callback with invalid worker id {}", worker_id);
        return R::default();
    };
    CURRENT_BRIDGE.with(|cell| match cell.borrow().as_ref() {
        Some(bridge) => f(bridge, worker),
        None => {
            warn!("Engine callback for worker {} outside of a request", worker);
            R::default()
        }
    })
}

unsafe extern "C" fn emit_line_trampoline(worker_id: c_int, line: *const u8, len: usize) {
    let line = StrandSlice { ptr: line, len }.as_bytes();
    with_bridge(worker_id, |bridge, worker| bridge.emit_line(worker, line));
}

unsafe extern "C" fn write_body_trampoline(worker_id: c_int, data: *const u8, len: usize) -> usize {
    let data = StrandSlice { ptr: data, len }.as_bytes();
    with_bridge(worker_id, |bridge, worker| bridge.write_body(worker, data))
}

unsafe extern "C" fn read_body_trampoline(worker_id: c_int, buf: *mut u8, len: usize) -> usize {
    if buf.is_null() || len == 0 {
        return 0;
    }
    let buf = std::slice::from_raw_parts_mut(buf, len);
    with_bridge(worker_id, |bridge, worker| bridge.read_body(worker, buf))
}

unsafe extern "C" fn log_message_trampoline(
    worker_id: c_int,
    message: *const u8,
    len: usize,
    severity: c_int,
) {
    let message = StrandSlice { ptr: message, len }.as_bytes();
    let message = String::from_utf8_lossy(message);
    with_bridge(worker_id, |bridge, worker| {
        bridge.log(worker, &message, severity)
    });
}

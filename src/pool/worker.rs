//! Workers: persistent execution slots, each pinned to one OS thread.

use super::idle::IdleQueue;
use crate::bridge::{ActiveRequest, Bridge};
use crate::engine::{Engine, EngineCall};
use crate::error::{EngineError, StrandError};
use crate::http::{AccessLogEntry, Request, ResponseSink};
use crate::marshal;
use bytes::BytesMut;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// Stable identity of a worker for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(usize);

impl WorkerId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }

    /// Id as received from across the engine boundary.
    pub fn from_raw(raw: i64) -> Option<Self> {
        usize::try_from(raw).ok().map(Self)
    }

    /// Id as passed across the engine boundary.
    pub fn as_raw(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker lifecycle: `Starting → Idle ⇄ Busy`, ending in `Stopped` on
/// shutdown or `Failed` when the engine call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Idle = 1,
    Busy = 2,
    Stopped = 3,
    Failed = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Starting,
            1 => WorkerState::Idle,
            2 => WorkerState::Busy,
            3 => WorkerState::Stopped,
            _ => WorkerState::Failed,
        }
    }
}

pub(crate) enum Command {
    Run(Job),
    Stop,
}

pub(crate) struct Job {
    pub(crate) request: Request,
    pub(crate) sink: Box<dyn ResponseSink>,
    pub(crate) done: oneshot::Sender<Completion>,
}

/// What a worker reports back once a request is finished.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Completion {
    pub(crate) status: u16,
    pub(crate) bytes_written: u64,
    pub(crate) failed: bool,
}

/// Shared, read-only view of one worker.
pub(crate) struct WorkerSlot {
    pub(crate) id: WorkerId,
    state: AtomicU8,
    served: AtomicU64,
    pub(crate) commands: mpsc::Sender<Command>,
}

impl WorkerSlot {
    pub(crate) fn new(id: WorkerId, commands: mpsc::Sender<Command>) -> Self {
        Self {
            id,
            state: AtomicU8::new(WorkerState::Starting as u8),
            served: AtomicU64::new(0),
            commands,
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// `Idle → Busy`; false if the worker was not idle.
    pub(crate) fn begin(&self) -> bool {
        self.state
            .compare_exchange(
                WorkerState::Idle as u8,
                WorkerState::Busy as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }
}

/// Id → worker lookup, built once and never mutated.
pub(crate) struct WorkerTable {
    slots: Box<[WorkerSlot]>,
}

impl WorkerTable {
    pub(crate) fn new(slots: Vec<WorkerSlot>) -> Self {
        debug_assert!(slots.iter().enumerate().all(|(i, s)| s.id.index() == i));
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Table whose command channels lead nowhere.
    #[cfg(test)]
    pub(crate) fn detached(len: usize) -> Self {
        let slots = (0..len)
            .map(|index| {
                let (tx, _rx) = mpsc::channel(1);
                WorkerSlot::new(WorkerId::new(index), tx)
            })
            .collect();
        Self::new(slots)
    }

    pub(crate) fn get(&self, id: WorkerId) -> Option<&WorkerSlot> {
        self.slots.get(id.index())
    }

    /// Slot for an id handed out by this table.
    pub(crate) fn slot(&self, id: WorkerId) -> &WorkerSlot {
        &self.slots[id.index()]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &WorkerSlot> {
        self.slots.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Thread-side state of one worker.
pub(crate) struct Worker {
    id: WorkerId,
    engine: Arc<dyn Engine>,
    bridge: Bridge,
    table: Arc<WorkerTable>,
    idle: Arc<IdleQueue>,
    handler: Arc<str>,
    headers: BytesMut,
    environment: BytesMut,
    scratch: BytesMut,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        engine: Arc<dyn Engine>,
        table: Arc<WorkerTable>,
        idle: Arc<IdleQueue>,
        handler: Arc<str>,
    ) -> Self {
        Self {
            id,
            engine,
            bridge: Bridge::new(table.clone()),
            table,
            idle,
            handler,
            headers: BytesMut::with_capacity(4096),
            environment: BytesMut::with_capacity(1024),
            scratch: BytesMut::with_capacity(8192),
        }
    }

    /// Worker thread body. Registers as idle, then serves requests until
    /// told to stop or until an engine call fails.
    pub(crate) fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        ready: std::sync::mpsc::Sender<Result<WorkerId, StrandError>>,
    ) {
        let table = self.table.clone();
        let slot = table.slot(self.id);
        debug!("Worker {} starting", self.id);

        let started = panic::catch_unwind(AssertUnwindSafe(|| self.engine.start_worker(self.id)))
            .unwrap_or_else(|payload| Err(EngineError::new(panic_message(payload))));
        if let Err(err) = started {
            error!("Worker {} failed to start: {}", self.id, err);
            slot.set_state(WorkerState::Failed);
            self.idle.retire();
            let _ = ready.send(Err(StrandError::WorkerStart {
                worker: self.id,
                reason: err.message,
            }));
            return;
        }

        slot.set_state(WorkerState::Idle);
        self.idle.push(self.id);
        let _ = ready.send(Ok(self.id));
        drop(ready);

        while let Some(command) = commands.blocking_recv() {
            match command {
                Command::Run(job) => {
                    if !self.serve(job) {
                        break;
                    }
                }
                Command::Stop => break,
            }
        }

        self.engine.stop_worker(self.id);
        if slot.state() != WorkerState::Failed {
            slot.set_state(WorkerState::Stopped);
        }
        debug!("Worker {} stopped", self.id);
    }

    /// Execute one request. Returns false if the worker must leave rotation.
    fn serve(&mut self, job: Job) -> bool {
        let Job {
            mut request,
            sink,
            done,
        } = job;

        marshal::marshal_into(
            &request,
            &self.handler,
            &mut self.headers,
            &mut self.environment,
        );
        let body = request.take_body();
        let scratch = std::mem::take(&mut self.scratch);
        ActiveRequest::new(self.id, sink, body, scratch).install();

        let call = EngineCall {
            worker: self.id,
            protocol: request.protocol_number(),
            method: request.method.as_str(),
            target: request.target(),
            query: request.query(),
            headers: &self.headers,
            environment: &self.environment,
        };
        let engine = &self.engine;
        let bridge = &self.bridge;
        let failure = match panic::catch_unwind(AssertUnwindSafe(|| engine.execute(&call, bridge)))
        {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.message),
            Err(payload) => Some(panic_message(payload)),
        };

        let Some(mut active) = ActiveRequest::take() else {
            error!("Worker {}: request state vanished during execution", self.id);
            self.table.slot(self.id).set_state(WorkerState::Failed);
            let _ = done.send(Completion {
                status: 0,
                bytes_written: 0,
                failed: true,
            });
            return false;
        };

        let status = match &failure {
            Some(reason) => {
                error!(
                    "Worker {}: engine call failed, removing worker from rotation: {}",
                    self.id, reason
                );
                active.response.fail(active.sink.as_mut())
            }
            None => active.response.finish(active.sink.as_mut()),
        };
        let bytes_written = active.response.bytes_written();

        let ActiveRequest {
            sink, mut scratch, ..
        } = active;
        scratch.clear();
        self.scratch = scratch;
        sink.finish();

        AccessLogEntry::now(
            &request.remote_addr,
            request.method.as_str(),
            request.target(),
            request.protocol(),
            status,
            bytes_written,
        )
        .emit();

        let slot = self.table.slot(self.id);
        slot.served.fetch_add(1, Ordering::Relaxed);
        slot.set_state(if failure.is_some() {
            WorkerState::Failed
        } else {
            WorkerState::Idle
        });
        let _ = done.send(Completion {
            status,
            bytes_written,
            failed: failure.is_some(),
        });
        failure.is_none()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("engine panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("engine panicked: {}", message)
    } else {
        "engine panicked".to_string()
    }
}

//! Pool manager: owns the workers and implements dispatch and shutdown.

use super::config::PoolConfig;
use super::idle::{IdleQueue, PopError};
use super::worker::{Command, Job, Worker, WorkerId, WorkerSlot, WorkerState, WorkerTable};
use crate::engine::Engine;
use crate::error::StrandError;
use crate::http::{Request, ResponseSink};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Result of a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Worker that served the request.
    pub worker: WorkerId,
    /// Status committed to the response sink.
    pub status: u16,
    /// Body bytes the sink accepted.
    pub bytes_written: u64,
    /// The engine call failed and the worker left rotation.
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub id: WorkerId,
    pub state: WorkerState,
    pub served: u64,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub workers: Vec<WorkerStats>,
    pub idle: usize,
    pub live: usize,
    pub closed: bool,
}

/// Fixed-size pool of thread-affine workers.
///
/// [`dispatch`](Self::dispatch) blocks the calling thread for the whole
/// request. Call it from a plain thread or from `spawn_blocking`, never
/// directly from async code.
pub struct WorkerPool {
    config: PoolConfig,
    engine: Arc<dyn Engine>,
    table: Arc<WorkerTable>,
    idle: Arc<IdleQueue>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl WorkerPool {
    /// Start `config.workers` workers and wait until every one is idle.
    pub fn initialize(config: PoolConfig, engine: Arc<dyn Engine>) -> Result<Self, StrandError> {
        config.validate()?;
        let count = config.workers;

        let mut receivers = Vec::with_capacity(count);
        let slots = (0..count)
            .map(|index| {
                let (tx, rx) = mpsc::channel(1);
                receivers.push(rx);
                WorkerSlot::new(WorkerId::new(index), tx)
            })
            .collect();
        let table = Arc::new(WorkerTable::new(slots));
        let idle = Arc::new(IdleQueue::new(count));
        let handler: Arc<str> = Arc::from(config.handler.as_str());

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let mut threads = Vec::with_capacity(count);
        for (index, commands) in receivers.into_iter().enumerate() {
            let id = WorkerId::new(index);
            let worker = Worker::new(
                id,
                engine.clone(),
                table.clone(),
                idle.clone(),
                handler.clone(),
            );
            let ready = ready_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("strand-worker-{}", id))
                .spawn(move || worker.run(commands, ready));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    abort_start(&table, &idle);
                    return Err(StrandError::Spawn(err));
                }
            }
        }
        drop(ready_tx);

        let deadline = Instant::now() + config.init_timeout_duration();
        let mut ready = 0;
        while ready < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match ready_rx.recv_timeout(remaining) {
                Ok(Ok(worker)) => {
                    debug!("Worker {} ready", worker);
                    ready += 1;
                }
                Ok(Err(err)) => {
                    abort_start(&table, &idle);
                    return Err(err);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    abort_start(&table, &idle);
                    return Err(StrandError::InitTimeout {
                        ready,
                        expected: count,
                    });
                }
            }
        }

        info!(
            "Worker pool ready: {} workers, handler {}",
            count, config.handler
        );
        Ok(Self {
            config,
            engine,
            table,
            idle,
            threads: Mutex::new(threads),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Run one request on an idle worker and wait for it to finish.
    ///
    /// Blocks while every worker is busy. The response is complete in
    /// `sink` by the time this returns `Ok`.
    pub fn dispatch(
        &self,
        request: Request,
        sink: Box<dyn ResponseSink>,
    ) -> Result<DispatchOutcome, StrandError> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut job = Job {
            request,
            sink,
            done: done_tx,
        };

        let worker = loop {
            let worker = self.idle.pop().map_err(|err| match err {
                PopError::Closed => StrandError::ShuttingDown,
                PopError::Exhausted => StrandError::NoWorkers,
            })?;
            let slot = self.table.slot(worker);
            if !slot.begin() {
                error!(
                    "Worker {} was in the idle queue while {:?}",
                    worker,
                    slot.state()
                );
                self.idle.retire();
                return Err(StrandError::WorkerBusy(worker));
            }

            match slot.commands.try_send(Command::Run(job)) {
                Ok(()) => break worker,
                Err(TrySendError::Closed(command)) => {
                    error!("Worker {} exited while idle, removing it", worker);
                    slot.set_state(WorkerState::Failed);
                    self.idle.retire();
                    let Command::Run(returned) = command else {
                        return Err(StrandError::WorkerLost(worker));
                    };
                    job = returned;
                }
                Err(TrySendError::Full(_)) => {
                    error!("Worker {} already had a pending command", worker);
                    self.idle.retire();
                    return Err(StrandError::WorkerBusy(worker));
                }
            }
        };

        let completion = match done_rx.blocking_recv() {
            Ok(completion) => completion,
            Err(_) => {
                error!("Worker {} exited during a request, removing it", worker);
                self.table.slot(worker).set_state(WorkerState::Failed);
                self.idle.retire();
                return Err(StrandError::WorkerLost(worker));
            }
        };

        if completion.failed {
            self.idle.retire();
            warn!(
                "Worker {} removed from rotation, {} of {} workers left",
                worker,
                self.idle.live(),
                self.table.len()
            );
        } else {
            self.idle.push(worker);
        }

        Ok(DispatchOutcome {
            worker,
            status: completion.status,
            bytes_written: completion.bytes_written,
            failed: completion.failed,
        })
    }

    /// Stop intake, let in-flight requests finish, then stop and join every
    /// worker and tear the engine down. Only the first call does anything.
    pub fn shutdown(&self) -> Result<(), StrandError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Err(StrandError::AlreadyShutdown);
        }
        info!("Shutting down worker pool");

        self.idle.close();
        self.idle.wait_drained();

        for slot in self.table.iter() {
            if slot.state() == WorkerState::Failed {
                continue;
            }
            if let Err(err) = slot.commands.try_send(Command::Stop) {
                debug!("Worker {} did not take the stop command: {}", slot.id, err);
            }
        }

        let threads = std::mem::take(
            &mut *self
                .threads
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in threads {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!("Thread {} panicked", name);
            }
        }

        self.engine.shutdown();
        info!("Worker pool stopped");
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self
                .table
                .iter()
                .map(|slot| WorkerStats {
                    id: slot.id,
                    state: slot.state(),
                    served: slot.served(),
                })
                .collect(),
            idle: self.idle.len(),
            live: self.idle.live(),
            closed: self.idle.is_closed(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.table.len()
    }

    /// Workers that have not failed.
    pub fn live_workers(&self) -> usize {
        self.idle.live()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            let _ = self.shutdown();
        }
    }
}

/// Release workers started by a failed initialization. Their threads are
/// left detached and exit once they see the stop command.
fn abort_start(table: &WorkerTable, idle: &IdleQueue) {
    idle.close();
    for slot in table.iter() {
        let _ = slot.commands.try_send(Command::Stop);
    }
}

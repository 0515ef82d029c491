//! Idle queue: the only shared structure between dispatchers and workers.
//!
//! Holds the ids of workers that are ready for a request. Capacity equals
//! the number of workers. Besides the queue itself it tracks how many
//! workers are still alive and whether intake has been closed, so waiting
//! dispatchers can be released on shutdown or when every worker has failed.

use super::WorkerId;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Debug)]
struct IdleState {
    queue: VecDeque<WorkerId>,
    live: usize,
    closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// Intake was closed by shutdown.
    Closed,
    /// No live workers remain.
    Exhausted,
}

#[derive(Debug)]
pub struct IdleQueue {
    capacity: usize,
    state: Mutex<IdleState>,
    changed: Condvar,
}

impl IdleQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(IdleState {
                queue: VecDeque::with_capacity(capacity),
                live: capacity,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IdleState> {
        // The state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn live(&self) -> usize {
        self.lock().live
    }

    /// Register an idle worker. Accepted even after close so in-flight
    /// requests can hand their worker back during shutdown.
    pub fn push(&self, worker: WorkerId) {
        let mut state = self.lock();
        debug_assert!(
            state.queue.len() < self.capacity,
            "idle queue over capacity"
        );
        debug_assert!(!state.queue.contains(&worker), "worker queued twice");
        state.queue.push_back(worker);
        drop(state);
        self.changed.notify_all();
    }

    /// Take an idle worker, blocking until one is available.
    pub fn pop(&self) -> Result<WorkerId, PopError> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(PopError::Closed);
            }
            if let Some(worker) = state.queue.pop_front() {
                return Ok(worker);
            }
            if state.live == 0 {
                return Err(PopError::Exhausted);
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// A worker left rotation for good.
    pub fn retire(&self) {
        let mut state = self.lock();
        state.live = state.live.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }

    /// Stop handing out workers. Blocked and future `pop` calls fail.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait until every live worker is back in the queue.
    pub fn wait_drained(&self) {
        let mut state = self.lock();
        while state.queue.len() < state.live {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

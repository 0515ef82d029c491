//! Worker pool: a fixed set of thread-affine workers fed through an idle
//! queue.
//!
//! ```text
//!   dispatch ──pop──▶ IdleQueue ──id──▶ WorkerSlot.commands ──▶ worker thread
//!      ▲                  ▲                                          │
//!      └── Completion ────┴──────────── push (after completion) ◀────┘
//! ```

mod config;
mod idle;
mod manager;
mod worker;

pub use config::PoolConfig;
pub use manager::{DispatchOutcome, PoolStats, WorkerPool, WorkerStats};
pub use worker::{WorkerId, WorkerState};

pub(crate) use worker::WorkerTable;

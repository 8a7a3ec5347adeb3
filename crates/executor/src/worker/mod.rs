//! Bounded worker pool
//!
//! This module provides:
//! - [`WorkerPool`] - fixed-size set of workers draining a bounded job queue
//! - [`WorkerPoolConfig`] - worker count and queue capacity
//! - [`JobHandle`] - optional completion signal for a submitted job
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │                                                              │
//! │   put(name, job) ──►  ┌──────────────────────┐              │
//! │                       │ bounded mpsc queue   │              │
//! │                       └──────────┬───────────┘              │
//! │                                  │ shared receiver           │
//! │            ┌─────────────┬───────┴─────┬─────────────┐      │
//! │            ▼             ▼             ▼             ▼      │
//! │        [worker 0]   [worker 1]    [worker 2]  ... [worker N]│
//! │                                                              │
//! │   close() ── watch broadcast ──► every worker exits         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod pool;

pub use pool::{JobHandle, WorkerPool, WorkerPoolConfig, WorkerPoolError};

//! # Nodewatch Executor
//!
//! Execution primitives used by the agent control plane.
//!
//! ## Features
//!
//! - **Bounded worker pool**: fixed number of workers draining a capacity-limited queue,
//!   with optional per-job timeouts
//! - **Backoff strategies**: pluggable [`Backoff`] trait with an exponential default
//! - **Retry controller**: runs at most one retry sequence per controller; a new request
//!   cancels and waits out the previous one before starting
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RetryController                           │
//! │  (cancel-and-replace, backoff wait, per-attempt timeout)    │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkerPool                              │
//! │  put() ──► [bounded queue] ──► worker 1..N ──► JobHandle    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use nodewatch_executor::prelude::*;
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::default().with_workers(4))?;
//! let handle = pool
//!     .put_with_timeout("mysql-add", async { Ok(()) }, Duration::from_secs(60))
//!     .await?;
//! handle.wait().await?;
//!
//! let controller = RetryController::new("mysql", RetryConfig::default());
//! controller.run(retry_operation(|| async { reload().await })).await;
//! ```

pub mod reliability;
pub mod worker;

pub mod duration_millis;

/// Prelude for common imports
pub mod prelude {
    pub use crate::reliability::{
        retry_operation, Backoff, ExponentialBackoff, RetryConfig, RetryController,
        RetryOperation, RetryState, RunOutcome,
    };
    pub use crate::worker::{JobHandle, WorkerPool, WorkerPoolConfig, WorkerPoolError};
}

// Re-export key types at crate root
pub use reliability::{
    retry_operation, Backoff, ExponentialBackoff, RetryConfig, RetryController, RetryOperation,
    RetryState, RunOutcome, MIN_BACKOFF,
};
pub use worker::{JobHandle, WorkerPool, WorkerPoolConfig, WorkerPoolError};

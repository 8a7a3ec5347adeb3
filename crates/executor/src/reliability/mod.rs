//! Reliability patterns for reconfiguration
//!
//! This module provides:
//! - [`Backoff`] - Replaceable delay sequence, with [`ExponentialBackoff`] as default
//! - [`RetryConfig`] - Attempt limits, backoff bounds and per-attempt timeout
//! - [`RetryController`] - Cancel-and-replace retry runner

mod backoff;
mod retry;

pub use backoff::{Backoff, ExponentialBackoff, MIN_BACKOFF};
pub use retry::{
    retry_operation, RetryConfig, RetryController, RetryOperation, RetryState, RunOutcome,
};

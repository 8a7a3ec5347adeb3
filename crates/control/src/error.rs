//! Control plane errors

use std::fmt;
use std::time::Duration;

use nodewatch_executor::WorkerPoolError;
use nodewatch_pipeline::PipelineError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EventKind;

/// Coarse classification used by callers to branch on failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    Convert,
    Start,
    Timeout,
    Closed,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyExists => "already_exists",
            Self::NotFound => "not_found",
            Self::Convert => "convert",
            Self::Start => "start",
            Self::Timeout => "timeout",
            Self::Closed => "closed",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    /// Add for a module that already has an entry
    #[error("module '{module}' already exists")]
    AlreadyExists { module: String },

    /// Update for a module without an entry
    #[error("module '{module}' not found")]
    NotFound { module: String },

    /// Load requested while pipelines are loaded
    #[error("pipelines are already loaded")]
    AlreadyLoaded,

    /// Module definition could not be turned into pipelines
    #[error("failed to convert module '{module}': {error}")]
    Convert {
        module: String,
        #[source]
        error: PipelineError,
    },

    /// A pipeline of the module failed to start
    #[error("failed to start pipelines of module '{module}': {error}")]
    Start {
        module: String,
        #[source]
        error: PipelineError,
    },

    /// Lifecycle work did not finish in time
    #[error("{operation} of module '{module}' timed out after {timeout:?}")]
    Timeout {
        module: String,
        operation: EventKind,
        timeout: Duration,
    },

    /// The pipeline manager is not accepting events
    #[error("pipeline manager is not running")]
    Closed,

    /// Worker pool failure
    #[error(transparent)]
    Pool(#[from] WorkerPoolError),

    #[error("{0}")]
    Internal(String),
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists { .. } | Self::AlreadyLoaded => ErrorKind::AlreadyExists,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Convert { .. } => ErrorKind::Convert,
            Self::Start { .. } => ErrorKind::Start,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Closed => ErrorKind::Closed,
            Self::Pool(WorkerPoolError::Timeout { .. }) => ErrorKind::Timeout,
            Self::Pool(WorkerPoolError::Closed) => ErrorKind::Closed,
            Self::Pool(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T, E = ControlError> = std::result::Result<T, E>;

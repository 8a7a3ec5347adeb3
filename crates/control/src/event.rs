//! Lifecycle events and their callbacks

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ErrorKind};

/// Mutation requested for a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one event, delivered exactly once to the caller
#[derive(Debug)]
pub struct CallbackEvent {
    pub status: ExecutionStatus,
    /// Human-readable outcome
    pub description: String,
    /// Set when `status` is [`ExecutionStatus::Failed`]
    pub error: Option<ControlError>,
}

impl CallbackEvent {
    pub fn succeeded(description: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Succeeded,
            description: description.into(),
            error: None,
        }
    }

    pub fn failed(error: ControlError) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            description: error.to_string(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    /// Classification of the failure, if any
    pub fn kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(ControlError::kind)
    }

    /// Description on success, error on failure
    pub fn into_result(self) -> Result<String, ControlError> {
        match self.status {
            ExecutionStatus::Succeeded => Ok(self.description),
            ExecutionStatus::Failed => Err(self
                .error
                .unwrap_or_else(|| ControlError::Internal(self.description))),
        }
    }
}

impl From<Result<String, ControlError>> for CallbackEvent {
    fn from(result: Result<String, ControlError>) -> Self {
        match result {
            Ok(description) => Self::succeeded(description),
            Err(error) => Self::failed(error),
        }
    }
}

//! # Nodewatch Control
//!
//! The control plane: applies configuration changes to running pipelines.
//!
//! ## Architecture
//!
//! ```text
//!  watcher ──► HotReloader ──(retry per module)──► ConfigManager ──► PipelineManager ──► WorkerPool
//!               init/update                         desired state      running pipelines
//! ```
//!
//! - [`HotReloader`] turns module pushes into retried add/update/delete operations,
//!   never running two for the same module at once
//! - [`ConfigManager`] converts modules into pipelines and records desired state
//!   once the pipeline manager confirms
//! - [`PipelineManager`] owns running pipelines; its start/stop work runs on the
//!   worker pool with a per-task timeout
//! - [`AgentContext`] constructs and owns all of the above

pub mod config;
pub mod config_manager;
pub mod context;
pub mod error;
pub mod event;
pub mod pipeline_manager;
pub mod reload;

pub use config::ControlConfig;
pub use config_manager::ConfigManager;
pub use context::AgentContext;
pub use error::{ControlError, ErrorKind, Result};
pub use event::{CallbackEvent, EventKind, ExecutionStatus};
pub use pipeline_manager::{PipelineManager, PipelineRequest};
pub use reload::HotReloader;

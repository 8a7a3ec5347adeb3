//! # Nodewatch Agent
//!
//! Process bootstrap around the control plane:
//!
//! - [`telemetry`]: `tracing` subscriber setup from the environment
//! - [`config`]: agent configuration from `NODEWATCH_*` variables
//! - [`watcher`]: polls the modules directory and feeds the hot reloader
//! - [`http`]: health and admin endpoints plus every scrape path published by exporters

pub mod config;
pub mod http;
pub mod telemetry;
pub mod watcher;

pub use config::AgentConfig;
pub use http::{router, spawn_route_installer, HttpState, RouteTable};
pub use telemetry::{init_telemetry, TelemetryConfig};
pub use watcher::{ModuleChange, ModuleWatcher};

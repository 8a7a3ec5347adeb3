//! # Nodewatch Pipeline
//!
//! The data plane of the agent: plugins, their registries, and the engine that
//! wires them into running pipelines.
//!
//! ## Features
//!
//! - **Plugin traits**: [`Source`], [`Processor`] and [`Sink`] over bounded batch streams
//! - **Registries**: plugins are created by name from [`PluginRegistry`] factories
//! - **Pipeline engine**: fan-in of every source, serial processor chain, single sink
//! - **Route groups**: pull-style exporters share HTTP paths through [`RouteGroupRegistry`]
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   convert   ┌──────────────────────────────────────────┐
//! │  Module  │ ──────────► │ Pipeline                                  │
//! │  (YAML)  │  Converter  │  sources ─► converge ─► serialize ─► sink │
//! └──────────┘             └──────────────────────────────────────────┘
//!                                                          │ exporter
//!                                                          ▼
//!                                             RouteGroupRegistry ─► HTTP
//! ```

pub mod cache;
pub mod config;
pub mod converter;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod plugin;
pub mod registry;
pub mod route;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-export key types at crate root
pub use cache::{CacheRef, MetricCache};
pub use config::{Module, ModuleStatus, PipelineDefinition, PluginRef, SinkRef, Structure};
pub use converter::{Converter, ModuleConverter};
pub use error::{PipelineError, PluginError, RegistryError, Result};
pub use message::{
    BatchReceiver, BatchSender, Message, MessageBatch, MessageKind, SINK_CHANNEL_CAPACITY,
    SOURCE_CHANNEL_CAPACITY, STAGE_CHANNEL_CAPACITY,
};
pub use pipeline::Pipeline;
pub use plugin::{PluginContext, Processor, Sink, Source};
pub use registry::{Factory, FactoryRegistry, PluginKind, PluginRegistry};
pub use route::{RouteGroupRegistry, RouteHandler, RouteRegistration};

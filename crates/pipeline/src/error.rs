//! Error types for the pipeline engine

use thiserror::Error;

use crate::registry::PluginKind;

/// Errors raised by plugin implementations
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin configuration could not be interpreted
    #[error("invalid plugin configuration: {0}")]
    Config(String),

    /// Plugin could not start
    #[error("plugin failed to start: {0}")]
    Start(String),

    /// Stream the plugin writes to was closed
    #[error("downstream closed")]
    Closed,

    /// Any other failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a start error
    pub fn start(msg: impl Into<String>) -> Self {
        Self::Start(msg.into())
    }
}

/// Errors from plugin registries
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Factory name already registered
    #[error("{kind} plugin '{name}' already registered")]
    Duplicate { kind: PluginKind, name: String },

    /// No factory registered under the name
    #[error("unknown {kind} plugin '{name}', available: [{available}]")]
    Unknown {
        kind: PluginKind,
        name: String,
        available: String,
    },

    /// Factory rejected the configuration
    #[error("failed to create {kind} plugin '{name}': {error}")]
    Create {
        kind: PluginKind,
        name: String,
        #[source]
        error: PluginError,
    },
}

/// Errors from pipeline construction and lifecycle
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Pipeline has no sources
    #[error("pipeline '{pipeline}' has no sources")]
    NoSources { pipeline: String },

    /// Pipeline has no sink
    #[error("pipeline '{pipeline}' has no sink")]
    NoSink { pipeline: String },

    /// Start called on a running pipeline
    #[error("pipeline '{pipeline}' is already running")]
    AlreadyRunning { pipeline: String },

    /// A source failed to start
    #[error("pipeline '{pipeline}': source '{plugin}' failed to start: {error}")]
    SourceStart {
        pipeline: String,
        plugin: String,
        #[source]
        error: PluginError,
    },

    /// The sink failed to start
    #[error("pipeline '{pipeline}': sink '{plugin}' failed to start: {error}")]
    SinkStart {
        pipeline: String,
        plugin: String,
        #[source]
        error: PluginError,
    },

    /// A plugin could not be created from the definition
    #[error("pipeline '{pipeline}': {error}")]
    Convert {
        pipeline: String,
        #[source]
        error: RegistryError,
    },

    /// Module or pipeline definition is malformed
    #[error("invalid definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },
}

/// Result type for pipeline operations
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

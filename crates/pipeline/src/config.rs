//! Module configuration
//!
//! A [`Module`] is a named group of pipeline definitions sharing an activation
//! status. Modules are usually loaded from YAML:
//!
//! ```yaml
//! name: mysql
//! status: active
//! pipelines:
//!   - name: mysql-status
//!     strategy: interval
//!     structure:
//!       sources: [{ plugin: host, config: { interval_ms: 5000 } }]
//!       processors: [{ plugin: add_tags, config: { tags: { node: db-1 } } }]
//!       sink: { exporter: { plugin: prometheus, config: { path: /metrics } } }
//! ```

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Activation status of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    /// Pipelines should be running
    #[default]
    Active,
    /// Pipelines should be removed
    Inactive,
    /// Configuration is unusable and must be ignored
    Invalid,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

/// Reference to a plugin by registered name plus its free-form configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRef {
    pub plugin: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl PluginRef {
    /// Reference a plugin with empty configuration
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            config: serde_json::Value::Null,
        }
    }

    /// Attach configuration
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Terminal stage of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkRef {
    /// Push-style output
    Output(PluginRef),
    /// Pull-style exporter (scraped over HTTP)
    Exporter(PluginRef),
}

impl SinkRef {
    /// Referenced plugin
    pub fn plugin(&self) -> &PluginRef {
        match self {
            Self::Output(p) | Self::Exporter(p) => p,
        }
    }

    /// Whether this is a pull-style exporter
    pub fn is_exporter(&self) -> bool {
        matches!(self, Self::Exporter(_))
    }
}

/// Plugins composing one pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub sources: Vec<PluginRef>,
    #[serde(default)]
    pub processors: Vec<PluginRef>,
    pub sink: SinkRef,
}

/// Definition of one pipeline inside a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    /// Scheduling strategy tag, interpreted by plugins
    #[serde(default = "default_strategy")]
    pub strategy: String,
    pub structure: Structure,
}

fn default_strategy() -> String {
    "default".to_string()
}

/// Named unit of configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub status: ModuleStatus,
    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,
}

impl Module {
    /// Create an active module without pipelines
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ModuleStatus::Active,
            pipelines: Vec::new(),
        }
    }

    /// Set the status
    pub fn with_status(mut self, status: ModuleStatus) -> Self {
        self.status = status;
        self
    }

    /// Add a pipeline definition
    pub fn with_pipeline(mut self, pipeline: PipelineDefinition) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    /// Parse a module from YAML
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Check structural rules not expressed by the types
    ///
    /// Names must be non-empty, pipeline names unique within the module, and
    /// every pipeline needs at least one source.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |reason: String| PipelineError::InvalidDefinition {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("module name is empty".into()));
        }

        let mut seen = HashSet::new();
        for pipeline in &self.pipelines {
            if pipeline.name.trim().is_empty() {
                return Err(invalid("pipeline name is empty".into()));
            }
            if !seen.insert(pipeline.name.as_str()) {
                return Err(invalid(format!("duplicate pipeline '{}'", pipeline.name)));
            }
            if pipeline.structure.sources.is_empty() {
                return Err(invalid(format!("pipeline '{}' has no sources", pipeline.name)));
            }
        }
        Ok(())
    }
}

impl PipelineDefinition {
    /// Create a definition with the default strategy
    pub fn new(name: impl Into<String>, structure: Structure) -> Self {
        Self {
            name: name.into(),
            strategy: default_strategy(),
            structure,
        }
    }
}

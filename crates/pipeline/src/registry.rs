//! Plugin registries for name-based plugin creation
//!
//! Each registry maps a plugin name (as written in module configuration) to a
//! factory that builds a plugin instance from its free-form configuration.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = PluginRegistry::new();
//! registry.inputs.register("host", |config, ctx| {
//!     Ok(Arc::new(HostSource::from_config(config, ctx)?) as Arc<dyn Source>)
//! })?;
//!
//! let source = registry.inputs.create("host", &config, &ctx)?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, RegistryError};
use crate::plugin::{PluginContext, Processor, Sink, Source};

/// Category of plugin held by a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Input,
    Processor,
    Output,
    Exporter,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Processor => write!(f, "processor"),
            Self::Output => write!(f, "output"),
            Self::Exporter => write!(f, "exporter"),
        }
    }
}

/// Factory function building a plugin from its configuration
pub type Factory<T> = Box<
    dyn Fn(&serde_json::Value, &PluginContext) -> Result<Arc<T>, PluginError> + Send + Sync,
>;

/// Name to factory map for one plugin kind
pub struct FactoryRegistry<T: ?Sized> {
    kind: PluginKind,
    factories: HashMap<String, Factory<T>>,
}

impl<T: ?Sized> FactoryRegistry<T> {
    /// Create an empty registry
    pub fn new(kind: PluginKind) -> Self {
        Self {
            kind,
            factories: HashMap::new(),
        }
    }

    /// Kind of plugin this registry holds
    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    /// Register a factory under `name`
    ///
    /// Fails if a factory with the same name already exists.
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&serde_json::Value, &PluginContext) -> Result<Arc<T>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(RegistryError::Duplicate {
                kind: self.kind,
                name: name.to_string(),
            });
        }
        self.factories.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    /// Create a plugin by name
    pub fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
        ctx: &PluginContext,
    ) -> Result<Arc<T>, RegistryError> {
        let factory = self.factories.get(name).ok_or_else(|| RegistryError::Unknown {
            kind: self.kind,
            name: name.to_string(),
            available: self.names().join(", "),
        })?;

        factory(config, ctx).map_err(|error| RegistryError::Create {
            kind: self.kind,
            name: name.to_string(),
            error,
        })
    }

    /// Check if a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered factories
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl<T: ?Sized> fmt::Debug for FactoryRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

/// The four plugin registries consulted by the converter
#[derive(Debug)]
pub struct PluginRegistry {
    pub inputs: FactoryRegistry<dyn Source>,
    pub processors: FactoryRegistry<dyn Processor>,
    pub outputs: FactoryRegistry<dyn Sink>,
    pub exporters: FactoryRegistry<dyn Sink>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Create empty registries
    pub fn new() -> Self {
        Self {
            inputs: FactoryRegistry::new(PluginKind::Input),
            processors: FactoryRegistry::new(PluginKind::Processor),
            outputs: FactoryRegistry::new(PluginKind::Output),
            exporters: FactoryRegistry::new(PluginKind::Exporter),
        }
    }
}

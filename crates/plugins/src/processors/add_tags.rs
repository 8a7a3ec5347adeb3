use std::collections::BTreeMap;

use async_trait::async_trait;
use nodewatch_pipeline::{MessageBatch, PluginError, Processor};
use serde::{Deserialize, Serialize};

use crate::task::parse_config;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddTagsConfig {
    pub tags: BTreeMap<String, String>,
    /// Replace tags the message already carries
    pub overwrite: bool,
}

impl Default for AddTagsConfig {
    fn default() -> Self {
        Self {
            tags: BTreeMap::new(),
            overwrite: true,
        }
    }
}

/// Merges configured tags into every message
pub struct AddTags {
    config: AddTagsConfig,
}

impl AddTags {
    pub fn new(config: AddTagsConfig) -> Result<Self, PluginError> {
        if config.tags.is_empty() {
            return Err(PluginError::config("add_tags needs at least one tag"));
        }
        Ok(Self { config })
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, PluginError> {
        Self::new(parse_config(config)?)
    }
}

#[async_trait]
impl Processor for AddTags {
    fn name(&self) -> &str {
        "add_tags"
    }

    async fn process(&self, mut batch: MessageBatch) -> Result<MessageBatch, PluginError> {
        for message in &mut batch {
            for (key, value) in &self.config.tags {
                if self.config.overwrite {
                    message.tags.insert(key.clone(), value.clone());
                } else {
                    message
                        .tags
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }
        Ok(batch)
    }
}

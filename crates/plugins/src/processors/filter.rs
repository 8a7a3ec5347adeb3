use async_trait::async_trait;
use nodewatch_pipeline::{MessageBatch, PluginError, Processor};
use serde::{Deserialize, Serialize};

use crate::task::parse_config;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Name prefixes to keep
    pub prefixes: Vec<String>,
}

/// Drops messages whose name matches none of the configured prefixes
pub struct NameFilter {
    prefixes: Vec<String>,
}

impl NameFilter {
    pub fn new(config: FilterConfig) -> Result<Self, PluginError> {
        if config.prefixes.is_empty() {
            return Err(PluginError::config("filter needs at least one prefix"));
        }
        Ok(Self {
            prefixes: config.prefixes,
        })
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, PluginError> {
        Self::new(parse_config(config)?)
    }
}

#[async_trait]
impl Processor for NameFilter {
    fn name(&self) -> &str {
        "filter"
    }

    async fn process(&self, mut batch: MessageBatch) -> Result<MessageBatch, PluginError> {
        batch.retain(|m| self.prefixes.iter().any(|p| m.name.starts_with(p.as_str())));
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodewatch_pipeline::Message;

    #[tokio::test]
    async fn test_keeps_matching_prefixes() {
        let filter =
            NameFilter::from_config(&serde_json::json!({ "prefixes": ["mysql_", "host_"] }))
                .unwrap();
        let out = filter
            .process(vec![
                Message::metric("mysql_up", 1.0),
                Message::metric("process_cpu_usage_percent", 3.0),
                Message::metric("host_memory_used_bytes", 10.0),
            ])
            .await
            .unwrap();

        let names: Vec<&str> = out.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["mysql_up", "host_memory_used_bytes"]);
    }

    #[test]
    fn test_requires_prefixes() {
        assert!(NameFilter::from_config(&serde_json::json!({ "prefixes": [] })).is_err());
    }
}

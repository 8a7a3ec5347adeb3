//! Source emitting a configured set of messages on an interval
//!
//! Useful for smoke-testing a module's wiring without touching a real database.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nodewatch_pipeline::{
    BatchSender, Message, MessageKind, PluginContext, PluginError, Source,
};
use serde::{Deserialize, Serialize};

use super::default_interval_ms;
use crate::task::{parse_config, run_interval, PluginTask};

/// One message emitted on every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

fn default_kind() -> MessageKind {
    MessageKind::Metric
}

impl MessageTemplate {
    fn render(&self) -> Message {
        Message {
            name: self.name.clone(),
            kind: self.kind,
            value: self.value,
            body: self.body.clone(),
            tags: self.tags.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    pub interval_ms: u64,
    pub messages: Vec<MessageTemplate>,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            messages: Vec::new(),
        }
    }
}

pub struct StaticSource {
    config: StaticConfig,
    pipeline: String,
    task: PluginTask,
}

impl StaticSource {
    pub fn new(config: StaticConfig, ctx: &PluginContext) -> Result<Self, PluginError> {
        if config.interval_ms == 0 {
            return Err(PluginError::config("interval_ms must be greater than 0"));
        }
        if let Some(template) = config
            .messages
            .iter()
            .find(|t| t.kind == MessageKind::Metric && t.value.is_none())
        {
            return Err(PluginError::config(format!(
                "metric '{}' needs a value",
                template.name
            )));
        }
        Ok(Self {
            config,
            pipeline: ctx.pipeline.clone(),
            task: PluginTask::new("static"),
        })
    }

    pub fn from_config(config: &serde_json::Value, ctx: &PluginContext) -> Result<Self, PluginError> {
        Self::new(parse_config(config)?, ctx)
    }
}

#[async_trait]
impl Source for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn start(&self, output: BatchSender) -> Result<(), PluginError> {
        let templates = self.config.messages.clone();
        let interval = Duration::from_millis(self.config.interval_ms);
        let plugin = format!("{}/static", self.pipeline);

        self.task.spawn(move |cancel| {
            run_interval(plugin, interval, output, cancel, move || {
                templates.iter().map(MessageTemplate::render).collect()
            })
        })
    }

    async fn stop(&self) {
        self.task.stop().await;
    }
}

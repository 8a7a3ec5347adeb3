//! Output writing every message as a tracing event

use async_trait::async_trait;
use nodewatch_pipeline::{BatchReceiver, Message, PluginContext, PluginError, Sink};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::task::{parse_config, run_drain, PluginTask};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOutputConfig {
    pub level: LogLevel,
}

pub struct LogOutput {
    level: LogLevel,
    module: String,
    pipeline: String,
    task: PluginTask,
}

impl LogOutput {
    pub fn new(config: LogOutputConfig, ctx: &PluginContext) -> Self {
        Self {
            level: config.level,
            module: ctx.module.clone(),
            pipeline: ctx.pipeline.clone(),
            task: PluginTask::new("log"),
        }
    }

    pub fn from_config(config: &serde_json::Value, ctx: &PluginContext) -> Result<Self, PluginError> {
        Ok(Self::new(parse_config(config)?, ctx))
    }
}

fn emit(level: LogLevel, module: &str, pipeline: &str, message: &Message) {
    let value = message.value.map(|v| v.to_string()).unwrap_or_default();
    let body = message.body.as_deref().unwrap_or_default();
    let tags = format!("{:?}", message.tags);
    match level {
        LogLevel::Debug => debug!(
            target: "nodewatch::output", %module, %pipeline, name = %message.name,
            kind = %message.kind, %value, %body, %tags, "message"
        ),
        LogLevel::Info => info!(
            target: "nodewatch::output", %module, %pipeline, name = %message.name,
            kind = %message.kind, %value, %body, %tags, "message"
        ),
        LogLevel::Warn => warn!(
            target: "nodewatch::output", %module, %pipeline, name = %message.name,
            kind = %message.kind, %value, %body, %tags, "message"
        ),
    }
}

#[async_trait]
impl Sink for LogOutput {
    fn name(&self) -> &str {
        "log"
    }

    async fn start(&self, input: BatchReceiver) -> Result<(), PluginError> {
        let level = self.level;
        let module = self.module.clone();
        let pipeline = self.pipeline.clone();
        let plugin = format!("{}/log", self.pipeline);

        self.task.spawn(move |cancel| {
            run_drain(plugin, input, cancel, move |batch| {
                for message in &batch {
                    emit(level, &module, &pipeline, message);
                }
            })
        })
    }

    async fn stop(&self) {
        self.task.stop().await;
    }
}

//! Host and agent-process resource metrics

use std::time::Duration;

use async_trait::async_trait;
use nodewatch_pipeline::{BatchSender, Message, MessageBatch, PluginContext, PluginError, Source};
use serde::{Deserialize, Serialize};
use sysinfo::{MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tracing::info;

use super::default_interval_ms;
use crate::task::{parse_config, run_interval, PluginTask};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Sampling interval
    pub interval_ms: u64,
    /// Also report CPU and RSS of the agent process
    pub include_process: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            include_process: true,
        }
    }
}

/// Samples host memory and the agent's own CPU/RSS on an interval
pub struct HostSource {
    config: HostConfig,
    pipeline: String,
    task: PluginTask,
}

impl HostSource {
    pub fn new(config: HostConfig, ctx: &PluginContext) -> Result<Self, PluginError> {
        if config.interval_ms == 0 {
            return Err(PluginError::config("interval_ms must be greater than 0"));
        }
        Ok(Self {
            config,
            pipeline: ctx.pipeline.clone(),
            task: PluginTask::new("host"),
        })
    }

    pub fn from_config(config: &serde_json::Value, ctx: &PluginContext) -> Result<Self, PluginError> {
        Self::new(parse_config(config)?, ctx)
    }
}

#[async_trait]
impl Source for HostSource {
    fn name(&self) -> &str {
        "host"
    }

    async fn start(&self, output: BatchSender) -> Result<(), PluginError> {
        let mut sampler = HostSampler::new(self.config.include_process);
        let interval = Duration::from_millis(self.config.interval_ms);
        let plugin = format!("{}/host", self.pipeline);

        self.task.spawn(move |cancel| {
            run_interval(plugin, interval, output, cancel, move || sampler.sample())
        })?;

        info!(pipeline = %self.pipeline, interval_ms = self.config.interval_ms, "Host source started");
        Ok(())
    }

    async fn stop(&self) {
        self.task.stop().await;
    }
}

struct HostSampler {
    system: System,
    pid: Pid,
    hostname: String,
    include_process: bool,
}

impl HostSampler {
    fn new(include_process: bool) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_memory(MemoryRefreshKind::everything())
                .with_processes(ProcessRefreshKind::everything()),
        );
        Self {
            system,
            pid: Pid::from_u32(std::process::id()),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            include_process,
        }
    }

    fn sample(&mut self) -> MessageBatch {
        self.system.refresh_memory();

        let mut batch = vec![
            Message::metric("host_memory_total_bytes", self.system.total_memory() as f64),
            Message::metric("host_memory_used_bytes", self.system.used_memory() as f64),
        ];

        if self.include_process {
            self.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[self.pid]),
                true,
                ProcessRefreshKind::everything(),
            );
            if let Some(process) = self.system.process(self.pid) {
                batch.push(Message::metric(
                    "process_cpu_usage_percent",
                    f64::from(process.cpu_usage()),
                ));
                batch.push(Message::metric(
                    "process_resident_memory_bytes",
                    process.memory() as f64,
                ));
            }
        }

        batch
            .into_iter()
            .map(|message| message.with_tag("host", self.hostname.clone()))
            .collect()
    }
}

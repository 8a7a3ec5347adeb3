//! Pull-style exporter serving the latest metrics over HTTP
//!
//! Each exporter owns one [`CacheRef`]. On start it makes sure its path is
//! published and joins the path's route group; scrapes then render every cache
//! of the group. On stop it leaves the group so the path only serves live
//! pipelines.

use std::sync::Arc;

use async_trait::async_trait;
use nodewatch_pipeline::{
    BatchReceiver, CacheRef, PluginContext, PluginError, RouteGroupRegistry, Sink,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::task::{parse_config, run_drain, PluginTask};

/// Paths owned by the agent's own HTTP surface
const RESERVED_PREFIXES: &[&str] = &["/health", "/admin"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub path: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            path: "/metrics".to_string(),
        }
    }
}

pub struct PrometheusExporter {
    path: String,
    pipeline: String,
    cache: CacheRef,
    routes: Arc<RouteGroupRegistry>,
    task: PluginTask,
}

impl PrometheusExporter {
    pub fn new(config: PrometheusConfig, ctx: &PluginContext) -> Result<Self, PluginError> {
        if !config.path.starts_with('/') {
            return Err(PluginError::config(format!(
                "path '{}' must start with '/'",
                config.path
            )));
        }
        if RESERVED_PREFIXES.iter().any(|p| config.path.starts_with(p)) {
            return Err(PluginError::config(format!("path '{}' is reserved", config.path)));
        }
        Ok(Self {
            path: config.path,
            pipeline: ctx.pipeline.clone(),
            cache: CacheRef::new(),
            routes: Arc::clone(&ctx.routes),
            task: PluginTask::new("prometheus"),
        })
    }

    pub fn from_config(config: &serde_json::Value, ctx: &PluginContext) -> Result<Self, PluginError> {
        Self::new(parse_config(config)?, ctx)
    }

    /// Cache this exporter writes into
    pub fn cache(&self) -> &CacheRef {
        &self.cache
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Sink for PrometheusExporter {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn start(&self, input: BatchReceiver) -> Result<(), PluginError> {
        let cache = self.cache.clone();
        let plugin = format!("{}/prometheus", self.pipeline);
        self.task.spawn(move |cancel| {
            run_drain(plugin, input, cancel, move |batch| cache.update(&batch))
        })?;

        self.routes.register_http_route(&self.path).await;
        self.routes.add_pipeline_group(&self.path, self.cache.clone());
        info!(pipeline = %self.pipeline, path = %self.path, "Exporter joined route group");
        Ok(())
    }

    async fn stop(&self) {
        self.task.stop().await;
        if self.routes.delete_pipeline_group(&self.path, &self.cache) {
            info!(pipeline = %self.pipeline, path = %self.path, "Exporter left route group");
        }
        self.cache.clear();
    }
}

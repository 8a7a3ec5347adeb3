//! Composition root wiring the control plane together

use std::sync::Arc;

use nodewatch_executor::WorkerPool;
use nodewatch_pipeline::{
    Converter, ModuleConverter, PluginRegistry, RouteGroupRegistry, RouteRegistration,
};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::ControlConfig;
use crate::config_manager::ConfigManager;
use crate::error::Result;
use crate::pipeline_manager::PipelineManager;
use crate::reload::HotReloader;

/// Every long-lived control plane component, constructed once at startup
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub pool: Arc<WorkerPool>,
    pub routes: Arc<RouteGroupRegistry>,
    pub pipelines: Arc<PipelineManager>,
    pub config: Arc<ConfigManager>,
    pub reloader: Arc<HotReloader>,
}

impl AgentContext {
    /// Build the control plane around the given plugin registry
    ///
    /// Also returns the receiving end of the route channel, to be consumed by
    /// the HTTP server.
    pub fn new(
        control: &ControlConfig,
        registry: PluginRegistry,
    ) -> Result<(Self, mpsc::Receiver<RouteRegistration>)> {
        let (routes, route_rx) = RouteGroupRegistry::new(control.route_channel_capacity);
        let converter = Arc::new(Converter::new(Arc::new(registry), Arc::clone(&routes)));
        let context = Self::with_converter(control, routes, converter)?;
        Ok((context, route_rx))
    }

    /// Build the control plane around any converter
    pub fn with_converter(
        control: &ControlConfig,
        routes: Arc<RouteGroupRegistry>,
        converter: Arc<dyn ModuleConverter>,
    ) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new(control.pool.clone())?);
        let pipelines = Arc::new(PipelineManager::new(Arc::clone(&pool), control));
        let config = Arc::new(ConfigManager::new(converter, Arc::clone(&pipelines)));
        let reloader = Arc::new(HotReloader::new(Arc::clone(&config), control.retry.clone()));

        Ok(Self {
            pool,
            routes,
            pipelines,
            config,
            reloader,
        })
    }

    /// Start accepting lifecycle events
    pub fn start(&self) -> Result<()> {
        self.pipelines.start()
    }

    /// Stop in dependency order: retries, pipelines, then the pool
    ///
    /// Closing the pool waits out pipeline jobs still running; they stop what
    /// they started once the pipeline manager is shut down.
    pub async fn shutdown(&self) {
        self.reloader.shutdown().await;
        self.pipelines.shutdown().await;
        self.pool.close().await;
        info!("Control plane stopped");
    }
}

//! Plugin traits implemented by sources, processors and sinks
//!
//! A pipeline owns its plugins as `Arc<dyn _>`; all lifecycle methods take `&self`
//! so implementations keep their running state behind interior mutability.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::PluginError;
use crate::message::{BatchReceiver, BatchSender, MessageBatch};
use crate::route::RouteGroupRegistry;

/// Produces message batches
#[async_trait]
pub trait Source: Send + Sync {
    /// Plugin name, used in logs
    fn name(&self) -> &str;

    /// Begin delivering batches into `output`
    ///
    /// Must return once delivery is running in the background, or fail
    /// synchronously if the source cannot start.
    async fn start(&self, output: BatchSender) -> Result<(), PluginError>;

    /// Stop delivering and release the output stream
    async fn stop(&self);
}

/// Transforms message batches
#[async_trait]
pub trait Processor: Send + Sync {
    /// Plugin name, used in logs
    fn name(&self) -> &str;

    /// Transform one batch
    async fn process(&self, batch: MessageBatch) -> Result<MessageBatch, PluginError>;

    /// Run the stage until `input` closes
    ///
    /// The default implementation applies [`process`](Self::process) to every batch.
    /// A batch whose processing fails is logged and dropped; the stage keeps running.
    async fn start(&self, mut input: BatchReceiver, output: BatchSender) -> Result<(), PluginError> {
        while let Some(batch) = input.recv().await {
            let size = batch.len();
            match self.process(batch).await {
                Ok(processed) if processed.is_empty() => {}
                Ok(processed) => {
                    if output.send(processed).await.is_err() {
                        return Err(PluginError::Closed);
                    }
                }
                Err(e) => {
                    warn!(processor = %self.name(), batch_size = size, error = %e, "Dropping batch");
                }
            }
        }
        Ok(())
    }

    /// Release any resources held by the processor
    async fn stop(&self) {}
}

/// Consumes message batches
#[async_trait]
pub trait Sink: Send + Sync {
    /// Plugin name, used in logs
    fn name(&self) -> &str;

    /// Begin draining `input` in the background until it closes
    async fn start(&self, input: BatchReceiver) -> Result<(), PluginError>;

    /// Stop draining and release resources
    async fn stop(&self);
}

/// Information handed to plugin factories
#[derive(Clone)]
pub struct PluginContext {
    /// Module the pipeline belongs to
    pub module: String,
    /// Pipeline name
    pub pipeline: String,
    /// Scheduling strategy tag of the pipeline definition
    pub strategy: String,
    /// Registry used by pull-style exporters
    pub routes: Arc<RouteGroupRegistry>,
}

impl PluginContext {
    /// Create a context for one pipeline of a module
    pub fn new(
        module: impl Into<String>,
        pipeline: impl Into<String>,
        routes: Arc<RouteGroupRegistry>,
    ) -> Self {
        Self {
            module: module.into(),
            pipeline: pipeline.into(),
            strategy: String::new(),
            routes,
        }
    }

    /// Set the scheduling strategy tag
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("module", &self.module)
            .field("pipeline", &self.pipeline)
            .field("strategy", &self.strategy)
            .finish()
    }
}

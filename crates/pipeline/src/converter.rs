//! Conversion of module definitions into runnable pipelines

use std::sync::Arc;

use tracing::debug;

use crate::config::{Module, PipelineDefinition, SinkRef};
use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::plugin::PluginContext;
use crate::registry::PluginRegistry;
use crate::route::RouteGroupRegistry;

/// Turns a module's pipeline definitions into pipeline instances
///
/// Conversion only builds plugins; nothing is started.
pub trait ModuleConverter: Send + Sync {
    fn convert(&self, module: &Module) -> Result<Vec<Pipeline>>;
}

/// Converter backed by the plugin registries
#[derive(Debug, Clone)]
pub struct Converter {
    registry: Arc<PluginRegistry>,
    routes: Arc<RouteGroupRegistry>,
}

impl Converter {
    pub fn new(registry: Arc<PluginRegistry>, routes: Arc<RouteGroupRegistry>) -> Self {
        Self { registry, routes }
    }

    fn convert_pipeline(&self, module: &str, definition: &PipelineDefinition) -> Result<Pipeline> {
        let ctx = PluginContext::new(module, &definition.name, Arc::clone(&self.routes))
            .with_strategy(&definition.strategy);
        let wrap = |error| PipelineError::Convert {
            pipeline: definition.name.clone(),
            error,
        };

        let mut pipeline = Pipeline::new(&definition.name);

        for source in &definition.structure.sources {
            let plugin = self
                .registry
                .inputs
                .create(&source.plugin, &source.config, &ctx)
                .map_err(wrap)?;
            pipeline = pipeline.with_source(plugin);
        }

        for processor in &definition.structure.processors {
            let plugin = self
                .registry
                .processors
                .create(&processor.plugin, &processor.config, &ctx)
                .map_err(wrap)?;
            pipeline = pipeline.with_processor(plugin);
        }

        let sink = match &definition.structure.sink {
            SinkRef::Output(r) => self.registry.outputs.create(&r.plugin, &r.config, &ctx),
            SinkRef::Exporter(r) => self.registry.exporters.create(&r.plugin, &r.config, &ctx),
        }
        .map_err(wrap)?;

        Ok(pipeline.with_sink(sink))
    }
}

impl ModuleConverter for Converter {
    fn convert(&self, module: &Module) -> Result<Vec<Pipeline>> {
        module.validate()?;

        let pipelines = module
            .pipelines
            .iter()
            .map(|definition| self.convert_pipeline(&module.name, definition))
            .collect::<Result<Vec<_>>>()?;

        debug!(module = %module.name, pipelines = pipelines.len(), "Converted module");
        Ok(pipelines)
    }
}

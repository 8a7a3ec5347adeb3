//! # Nodewatch Plugins
//!
//! Built-in plugins and the registry that exposes them by name.
//!
//! | Kind      | Name         | Plugin                 |
//! |-----------|--------------|------------------------|
//! | input     | `host`       | [`HostSource`]         |
//! | input     | `static`     | [`StaticSource`]       |
//! | processor | `add_tags`   | [`AddTags`]            |
//! | processor | `filter`     | [`NameFilter`]         |
//! | output    | `log`        | [`LogOutput`]          |
//! | output    | `discard`    | [`DiscardOutput`]      |
//! | exporter  | `prometheus` | [`PrometheusExporter`] |

use std::sync::Arc;

use nodewatch_pipeline::{PluginRegistry, Processor, RegistryError, Sink, Source};

pub mod exporters;
pub mod inputs;
pub mod outputs;
pub mod processors;

mod task;

pub use exporters::{PrometheusConfig, PrometheusExporter};
pub use inputs::{HostConfig, HostSource, MessageTemplate, StaticConfig, StaticSource};
pub use outputs::{DiscardOutput, LogLevel, LogOutput, LogOutputConfig};
pub use processors::{AddTags, AddTagsConfig, FilterConfig, NameFilter};

/// Register every built-in plugin into `registry`
pub fn register_builtins(registry: &mut PluginRegistry) -> Result<(), RegistryError> {
    registry.inputs.register("host", |config, ctx| {
        Ok(Arc::new(HostSource::from_config(config, ctx)?) as Arc<dyn Source>)
    })?;
    registry.inputs.register("static", |config, ctx| {
        Ok(Arc::new(StaticSource::from_config(config, ctx)?) as Arc<dyn Source>)
    })?;

    registry.processors.register("add_tags", |config, _| {
        Ok(Arc::new(AddTags::from_config(config)?) as Arc<dyn Processor>)
    })?;
    registry.processors.register("filter", |config, _| {
        Ok(Arc::new(NameFilter::from_config(config)?) as Arc<dyn Processor>)
    })?;

    registry.outputs.register("log", |config, ctx| {
        Ok(Arc::new(LogOutput::from_config(config, ctx)?) as Arc<dyn Sink>)
    })?;
    registry
        .outputs
        .register("discard", |_, _| Ok(Arc::new(DiscardOutput::new()) as Arc<dyn Sink>))?;

    registry.exporters.register("prometheus", |config, ctx| {
        Ok(Arc::new(PrometheusExporter::from_config(config, ctx)?) as Arc<dyn Sink>)
    })?;

    Ok(())
}

/// Registry holding only the built-in plugins
pub fn default_registry() -> Result<PluginRegistry, RegistryError> {
    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodewatch_pipeline::{
        Converter, Module, ModuleConverter, PipelineDefinition, PluginRef, RouteGroupRegistry,
        SinkRef, Structure,
    };

    #[test]
    fn test_default_registry_names() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.inputs.names(), vec!["host", "static"]);
        assert_eq!(registry.processors.names(), vec!["add_tags", "filter"]);
        assert_eq!(registry.outputs.names(), vec!["discard", "log"]);
        assert_eq!(registry.exporters.names(), vec!["prometheus"]);
    }

    #[test]
    fn test_builtins_register_once() {
        let mut registry = default_registry().unwrap();
        assert!(matches!(
            register_builtins(&mut registry),
            Err(RegistryError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_convert_yaml_module_with_builtins() {
        let module = Module::from_yaml(
            r#"
name: mysql
pipelines:
  - name: status
    structure:
      sources: [{ plugin: static, config: { messages: [{ name: up, value: 1 }] } }]
      processors: [{ plugin: add_tags, config: { tags: { node: db-1 } } }]
      sink: { exporter: { plugin: prometheus, config: { path: /mysql } } }
"#,
        )
        .unwrap();

        let (routes, _rx) = RouteGroupRegistry::new(4);
        let converter = Converter::new(Arc::new(default_registry().unwrap()), routes);
        let pipelines = converter.convert(&module).unwrap();
        assert_eq!(pipelines.len(), 1);
        assert_eq!(pipelines[0].name(), "status");
    }

    #[test]
    fn test_bad_plugin_config_fails_conversion() {
        let module = Module::new("broken").with_pipeline(PipelineDefinition::new(
            "p",
            Structure {
                sources: vec![PluginRef::new("host").with_config(serde_json::json!({ "interval_ms": 0 }))],
                processors: vec![],
                sink: SinkRef::Output(PluginRef::new("discard")),
            },
        ));

        let (routes, _rx) = RouteGroupRegistry::new(4);
        let converter = Converter::new(Arc::new(default_registry().unwrap()), routes);
        let err = converter.convert(&module).unwrap_err();
        assert!(err.to_string().contains("interval_ms"));
    }
}

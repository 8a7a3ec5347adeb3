//! Config manager
//!
//! Holds the desired configuration of every module and turns module-level
//! add/update/delete requests into pipeline lifecycle events. Requests are
//! plain async calls; one lock held for the whole request applies them in
//! arrival order.

use std::collections::HashMap;
use std::sync::Arc;

use nodewatch_pipeline::{Module, ModuleConverter, Pipeline};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{ControlError, Result};
use crate::event::{CallbackEvent, EventKind};
use crate::pipeline_manager::{PipelineManager, PipelineRequest};

pub struct ConfigManager {
    converter: Arc<dyn ModuleConverter>,
    pipelines: Arc<PipelineManager>,
    desired: Mutex<HashMap<String, Module>>,
}

impl ConfigManager {
    pub fn new(converter: Arc<dyn ModuleConverter>, pipelines: Arc<PipelineManager>) -> Self {
        Self {
            converter,
            pipelines,
            desired: Mutex::new(HashMap::new()),
        }
    }

    /// Apply one configuration event and return its callback
    ///
    /// The desired-state map changes only when the pipeline manager reports
    /// success.
    #[instrument(skip(self, module), fields(module = %module.name, event = %kind))]
    pub async fn handle_config_event(&self, kind: EventKind, module: Module) -> CallbackEvent {
        let mut desired = self.desired.lock().await;
        let name = module.name.clone();

        match kind {
            EventKind::Add => {
                if desired.contains_key(&name) {
                    return CallbackEvent::failed(ControlError::AlreadyExists { module: name });
                }
            }
            EventKind::Update => {
                if !desired.contains_key(&name) {
                    warn!(module = %name, "Update for a module with no desired state, applying anyway");
                }
            }
            EventKind::Delete => {}
        }

        let request = match kind {
            EventKind::Add => match self.convert(&module) {
                Ok(pipelines) => PipelineRequest::add(&name, pipelines),
                Err(e) => return CallbackEvent::failed(e),
            },
            EventKind::Update => match self.convert(&module) {
                Ok(pipelines) => PipelineRequest::update(&name, pipelines),
                Err(e) => return CallbackEvent::failed(e),
            },
            // Deletes go by name; the module's definitions are not needed
            EventKind::Delete => PipelineRequest::delete(&name),
        };

        let callback = self.pipelines.handle_pipeline_event(request).await;
        if !callback.is_success() {
            debug!(module = %name, description = %callback.description, "Pipeline event failed");
            return callback;
        }

        match kind {
            EventKind::Add | EventKind::Update => {
                desired.insert(name.clone(), module);
            }
            EventKind::Delete => {
                desired.remove(&name);
            }
        }
        info!(module = %name, event = %kind, "Configuration applied");
        callback
    }

    pub async fn add(&self, module: Module) -> Result<String> {
        self.handle_config_event(EventKind::Add, module)
            .await
            .into_result()
    }

    pub async fn update(&self, module: Module) -> Result<String> {
        self.handle_config_event(EventKind::Update, module)
            .await
            .into_result()
    }

    pub async fn delete(&self, module: Module) -> Result<String> {
        self.handle_config_event(EventKind::Delete, module)
            .await
            .into_result()
    }

    /// Desired configuration of one module
    pub async fn get(&self, name: &str) -> Option<Module> {
        self.desired.lock().await.get(name).cloned()
    }

    /// Desired configuration of every module, sorted by name
    pub async fn modules(&self) -> Vec<Module> {
        let desired = self.desired.lock().await;
        let mut modules: Vec<Module> = desired.values().cloned().collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        modules
    }

    fn convert(&self, module: &Module) -> Result<Vec<Pipeline>> {
        self.converter
            .convert(module)
            .map_err(|error| ControlError::Convert {
                module: module.name.clone(),
                error,
            })
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("pipelines", &self.pipelines)
            .finish()
    }
}

//! Hot-reload entry points
//!
//! Configuration watchers call [`HotReloader::init_module_callback`] when a
//! module is first seen and [`HotReloader::update_module_callback`] when it
//! changes. Each call becomes a retried operation on the module's own
//! [`RetryController`], so a new push for a module cancels and waits out the
//! previous one before it starts.

use std::collections::HashMap;
use std::sync::Arc;

use nodewatch_executor::{retry_operation, RetryConfig, RetryController, RetryState, RunOutcome};
use nodewatch_pipeline::{Module, ModuleStatus};
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::config_manager::ConfigManager;
use crate::error::ErrorKind;

/// Which callback received the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Init,
    Update,
}

pub struct HotReloader {
    config: Arc<ConfigManager>,
    retry: RetryConfig,
    controllers: Mutex<HashMap<String, Arc<RetryController>>>,
}

impl HotReloader {
    pub fn new(config: Arc<ConfigManager>, retry: RetryConfig) -> Self {
        Self {
            config,
            retry,
            controllers: Mutex::new(HashMap::new()),
        }
    }

    /// A module appeared; add it, falling back to update if it already exists
    #[instrument(skip(self, module), fields(module = %module.name, status = %module.status))]
    pub async fn init_module_callback(&self, module: Module) {
        self.schedule(module, Entry::Init).await;
    }

    /// A module changed; update it, falling back to add if it does not exist
    #[instrument(skip(self, module), fields(module = %module.name, status = %module.status))]
    pub async fn update_module_callback(&self, module: Module) {
        self.schedule(module, Entry::Update).await;
    }

    /// Retry state of a module, if it ever had a push
    pub async fn status(&self, module: &str) -> Option<RetryState> {
        let controller = self.controllers.lock().get(module).cloned()?;
        Some(controller.state().await)
    }

    /// Wait for the module's current run to finish
    pub async fn wait(&self, module: &str) -> Option<RunOutcome> {
        let controller = self.controllers.lock().get(module).cloned()?;
        controller.wait().await
    }

    /// Cancel every in-flight run
    pub async fn shutdown(&self) {
        let controllers: Vec<Arc<RetryController>> =
            self.controllers.lock().values().cloned().collect();
        for controller in controllers {
            controller.cancel().await;
        }
        info!("Hot reloader stopped");
    }

    fn controller(&self, module: &str) -> Arc<RetryController> {
        let mut controllers = self.controllers.lock();
        Arc::clone(
            controllers
                .entry(module.to_string())
                .or_insert_with(|| Arc::new(RetryController::new(module, self.retry.clone()))),
        )
    }

    async fn schedule(&self, module: Module, entry: Entry) {
        let name = module.name.clone();
        let config = Arc::clone(&self.config);

        let operation = match module.status {
            ModuleStatus::Invalid => {
                warn!(module = %name, "Skipping invalid module");
                return;
            }
            ModuleStatus::Inactive => {
                info!(module = %name, "Module inactive, removing its pipelines");
                retry_operation(move || {
                    let config = Arc::clone(&config);
                    let module = module.clone();
                    async move {
                        config.delete(module).await?;
                        Ok(())
                    }
                })
            }
            ModuleStatus::Active => retry_operation(move || {
                let config = Arc::clone(&config);
                let module = module.clone();
                async move {
                    match entry {
                        Entry::Init => add_or_update(&config, module).await,
                        Entry::Update => update_or_add(&config, module).await,
                    }
                }
            }),
        };

        self.controller(&name).run(operation).await;
    }
}

async fn add_or_update(config: &ConfigManager, module: Module) -> anyhow::Result<()> {
    match config.add(module.clone()).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            info!(module = %module.name, "Module already exists, updating instead");
            config.update(module).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn update_or_add(config: &ConfigManager, module: Module) -> anyhow::Result<()> {
    match config.update(module.clone()).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(module = %module.name, "Module has no pipelines, adding instead");
            config.add(module).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl std::fmt::Debug for HotReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let modules: Vec<String> = self.controllers.lock().keys().cloned().collect();
        f.debug_struct("HotReloader")
            .field("retry", &self.retry)
            .field("modules", &modules)
            .finish()
    }
}

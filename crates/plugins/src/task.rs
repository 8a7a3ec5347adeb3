//! Background task plumbing shared by the built-in plugins

use std::future::Future;
use std::time::Duration;

use nodewatch_pipeline::{BatchReceiver, BatchSender, MessageBatch, PluginError};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Parse a plugin config block, treating a missing block as the default
pub(crate) fn parse_config<T>(config: &serde_json::Value) -> Result<T, PluginError>
where
    T: DeserializeOwned + Default,
{
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| PluginError::config(e.to_string()))
}

/// At most one background task per plugin instance
pub(crate) struct PluginTask {
    name: String,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl PluginTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: Mutex::new(None),
        }
    }

    /// Spawn the task; fails if one is already running
    pub fn spawn<F, Fut>(&self, task: F) -> Result<(), PluginError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(PluginError::start(format!("{} is already running", self.name)));
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task(cancel.clone()));
        *running = Some((cancel, handle));
        Ok(())
    }

    /// Cancel the task and wait for it to exit
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some((cancel, handle)) = running else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            warn!(plugin = %self.name, "Plugin task ended abnormally: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

/// Emit `collect()` into `output` every `interval` until cancelled or the stream closes
///
/// The first batch is emitted immediately. Empty batches are not sent.
pub(crate) async fn run_interval<F>(
    plugin: String,
    interval: Duration,
    output: BatchSender,
    cancel: CancellationToken,
    mut collect: F,
) where
    F: FnMut() -> MessageBatch + Send,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let batch = collect();
        if batch.is_empty() {
            continue;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = output.send(batch) => {
                if sent.is_err() {
                    debug!(%plugin, "Output stream closed");
                    break;
                }
            }
        }
    }
    debug!(%plugin, "Interval loop exited");
}

/// Feed every batch of `input` to `handle` until the stream closes or `cancel` fires
///
/// On cancel the stream is closed and whatever is still buffered is handled.
pub(crate) async fn run_drain<F>(
    plugin: String,
    mut input: BatchReceiver,
    cancel: CancellationToken,
    mut handle: F,
) where
    F: FnMut(MessageBatch) + Send,
{
    loop {
        tokio::select! {
            biased;
            batch = input.recv() => match batch {
                Some(batch) => handle(batch),
                None => break,
            },
            _ = cancel.cancelled() => {
                input.close();
                while let Some(batch) = input.recv().await {
                    handle(batch);
                }
                break;
            }
        }
    }
    debug!(%plugin, "Drain loop exited");
}

//! Mock plugins for tests
//!
//! Every mock records its lifecycle calls as `"{role}:{name}:{call}"` entries in
//! a shared [`CallLog`], so tests can assert how often and in which order
//! components were started and stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PluginError;
use crate::message::{BatchReceiver, BatchSender, Message, MessageBatch};
use crate::plugin::{Processor, Sink, Source};

/// Ordered record of plugin calls shared between mocks
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Copy of all entries in call order
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Number of entries equal to `entry`
    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Source emitting a fixed list of batches
///
/// By default the output stream is released once every batch is sent; a
/// streaming source holds it until stopped.
pub struct MockSource {
    name: String,
    batches: Vec<MessageBatch>,
    streaming: bool,
    fail_start: bool,
    log: CallLog,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MockSource {
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            batches: Vec::new(),
            streaming: false,
            fail_start: false,
            log,
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    pub fn with_batch(mut self, batch: MessageBatch) -> Self {
        self.batches.push(batch);
        self
    }

    /// Keep the output stream open until stopped
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Fail every start
    pub fn failing(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

#[async_trait]
impl Source for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, output: BatchSender) -> Result<(), PluginError> {
        self.log.record(format!("source:{}:start", self.name));
        if self.fail_start {
            return Err(PluginError::start(format!("{} refused to start", self.name)));
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        let batches = self.batches.clone();
        let streaming = self.streaming;

        let task = tokio::spawn(async move {
            for batch in batches {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = output.send(batch) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            if streaming {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = output.closed() => {}
                }
            }
        });
        *self.task.lock() = Some(task);
        Ok(())
    }

    async fn stop(&self) {
        self.log.record(format!("source:{}:stop", self.name));
        self.cancel.lock().cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Processor setting one tag and appending its name to the `trail` tag
pub struct TagProcessor {
    name: String,
    key: String,
    value: String,
    reject: Option<String>,
    log: CallLog,
}

impl TagProcessor {
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        log: CallLog,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            value: value.into(),
            reject: None,
            log,
        }
    }

    /// Fail any batch containing a message with this name
    pub fn rejecting(mut self, message: impl Into<String>) -> Self {
        self.reject = Some(message.into());
        self
    }
}

#[async_trait]
impl Processor for TagProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, batch: MessageBatch) -> Result<MessageBatch, PluginError> {
        if let Some(reject) = &self.reject {
            if batch.iter().any(|m| &m.name == reject) {
                return Err(anyhow::anyhow!("rejected message '{}'", reject).into());
            }
        }

        Ok(batch
            .into_iter()
            .map(|mut message| {
                message.tags.insert(self.key.clone(), self.value.clone());
                let trail = match message.tags.get("trail") {
                    Some(trail) => format!("{}>{}", trail, self.name),
                    None => self.name.clone(),
                };
                message.tags.insert("trail".to_string(), trail);
                message
            })
            .collect())
    }

    async fn stop(&self) {
        self.log.record(format!("processor:{}:stop", self.name));
    }
}

/// Sink collecting every message it drains
pub struct CollectingSink {
    name: String,
    fail_start: bool,
    log: CallLog,
    received: Arc<Mutex<Vec<Message>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CollectingSink {
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            fail_start: false,
            log,
            received: Arc::new(Mutex::new(Vec::new())),
            task: Mutex::new(None),
        }
    }

    /// Fail every start
    pub fn failing(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Copy of the messages received so far
    pub fn messages(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    /// Wait until at least `count` messages arrived
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let received = Arc::clone(&self.received);
        tokio::time::timeout(timeout, async move {
            while received.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl Sink for CollectingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, mut input: BatchReceiver) -> Result<(), PluginError> {
        if self.fail_start {
            return Err(PluginError::start(format!("{} refused to start", self.name)));
        }
        self.log.record(format!("sink:{}:start", self.name));

        let received = Arc::clone(&self.received);
        let task = tokio::spawn(async move {
            while let Some(batch) = input.recv().await {
                received.lock().extend(batch);
            }
        });
        *self.task.lock() = Some(task);
        Ok(())
    }

    async fn stop(&self) {
        self.log.record(format!("sink:{}:stop", self.name));
        let task = self.task.lock().take();
        if let Some(task) = task {
            // The input closes once every upstream stage is gone
            if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
                tracing::warn!(sink = %self.name, "Sink drain did not finish");
            }
        }
    }
}

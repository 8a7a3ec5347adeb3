use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nodewatch_pipeline::{BatchReceiver, PluginError, Sink};
use tracing::debug;

use crate::task::{run_drain, PluginTask};

/// Drains and drops everything, counting messages
pub struct DiscardOutput {
    discarded: Arc<AtomicU64>,
    task: PluginTask,
}

impl DiscardOutput {
    pub fn new() -> Self {
        Self {
            discarded: Arc::new(AtomicU64::new(0)),
            task: PluginTask::new("discard"),
        }
    }

    /// Messages dropped so far
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl Default for DiscardOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for DiscardOutput {
    fn name(&self) -> &str {
        "discard"
    }

    async fn start(&self, input: BatchReceiver) -> Result<(), PluginError> {
        let discarded = Arc::clone(&self.discarded);
        self.task.spawn(move |cancel| {
            run_drain("discard".to_string(), input, cancel, move |batch| {
                discarded.fetch_add(batch.len() as u64, Ordering::Relaxed);
            })
        })
    }

    async fn stop(&self) {
        self.task.stop().await;
        debug!(discarded = self.discarded(), "Discard output stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodewatch_pipeline::Message;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_counts_discarded() {
        let output = DiscardOutput::new();
        let (tx, rx) = mpsc::channel(4);
        output.start(rx).await.unwrap();

        tx.send(vec![Message::metric("a", 1.0), Message::metric("b", 2.0)])
            .await
            .unwrap();
        drop(tx);
        output.stop().await;

        assert_eq!(output.discarded(), 2);
    }
}

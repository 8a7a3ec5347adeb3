//! Running pipeline: fan-in of sources, serial processor chain, one sink
//!
//! ```text
//!  source 1 ──► [stream] ──► reader ─┐
//!  source 2 ──► [stream] ──► reader ─┼──► [merged] ──► P1 ──► P2 ──► [sink stream] ──► sink
//!  source N ──► [stream] ──► reader ─┘
//! ```
//!
//! The merged stream closes once every reader has dropped its sender, so no
//! reader can write after close. Each processor stage closes its output when
//! its input closes, which cascades shutdown down to the sink.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{PipelineError, Result};
use crate::message::{
    BatchReceiver, SINK_CHANNEL_CAPACITY, SOURCE_CHANNEL_CAPACITY, STAGE_CHANNEL_CAPACITY,
};
use crate::plugin::{Processor, Sink, Source};

/// How long `stop` waits for processor stages to drain before aborting them
const STAGE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tasks and cancellation created by `start`
struct Topology {
    cancel: CancellationToken,
    readers: Vec<JoinHandle<()>>,
    stages: Vec<JoinHandle<()>>,
}

impl Topology {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            readers: Vec::new(),
            stages: Vec::new(),
        }
    }
}

/// One Source(s) -> Processor(s) -> Sink graph
pub struct Pipeline {
    name: String,
    sources: Vec<Arc<dyn Source>>,
    processors: Vec<Arc<dyn Processor>>,
    sink: Option<Arc<dyn Sink>>,
    runtime: Option<Topology>,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
            processors: Vec::new(),
            sink: None,
            runtime: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    /// Append a processor; processors run in insertion order
    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `start` succeeded and `stop` has not been called since
    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Build the stream topology and start every plugin
    ///
    /// A source or sink start failure stops whatever was started and returns the
    /// error.
    #[instrument(skip(self), fields(pipeline = %self.name))]
    pub async fn start(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            return Err(PipelineError::AlreadyRunning {
                pipeline: self.name.clone(),
            });
        }
        if self.sources.is_empty() {
            return Err(PipelineError::NoSources {
                pipeline: self.name.clone(),
            });
        }
        let Some(sink) = self.sink.clone() else {
            return Err(PipelineError::NoSink {
                pipeline: self.name.clone(),
            });
        };

        // Installed before any plugin starts so cleanup after a failure goes through stop()
        let topology = Topology::new();
        let cancel = topology.cancel.clone();
        self.runtime = Some(topology);

        let mut streams = Vec::with_capacity(self.sources.len());
        let mut starts = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);
            streams.push(rx);
            starts.push(source.start(tx));
        }
        let results = join_all(starts).await;

        let failed = self
            .sources
            .iter()
            .zip(results)
            .find_map(|(source, result)| result.err().map(|e| (source.name().to_string(), e)));
        if let Some((plugin, error)) = failed {
            warn!(pipeline = %self.name, source = %plugin, error = %error, "Source failed to start");
            self.stop().await;
            return Err(PipelineError::SourceStart {
                pipeline: self.name.clone(),
                plugin,
                error,
            });
        }

        let (merged, readers) = converge(&self.name, streams, &cancel);
        let (sink_stream, stages) = serialize(&self.name, merged, &self.processors);
        if let Some(topology) = self.runtime.as_mut() {
            topology.readers = readers;
            topology.stages = stages;
        }

        if let Err(error) = sink.start(sink_stream).await {
            warn!(pipeline = %self.name, sink = %sink.name(), error = %error, "Sink failed to start");
            self.stop().await;
            return Err(PipelineError::SinkStart {
                pipeline: self.name.clone(),
                plugin: sink.name().to_string(),
                error,
            });
        }

        info!(
            pipeline = %self.name,
            sources = self.sources.len(),
            processors = self.processors.len(),
            sink = %sink.name(),
            "Pipeline started"
        );
        Ok(())
    }

    /// Stop every plugin and release the topology
    ///
    /// Sources stop first, then the source-facing streams are closed, then
    /// processors, then the sink. Calling `stop` on a stopped pipeline does nothing.
    #[instrument(skip(self), fields(pipeline = %self.name))]
    pub async fn stop(&mut self) {
        let Some(topology) = self.runtime.take() else {
            return;
        };

        join_all(self.sources.iter().map(|source| source.stop())).await;

        topology.cancel.cancel();
        for reader in topology.readers {
            if let Err(e) = reader.await {
                warn!(pipeline = %self.name, "Stream reader ended abnormally: {}", e);
            }
        }

        join_all(self.processors.iter().map(|processor| processor.stop())).await;

        for stage in topology.stages {
            let abort = stage.abort_handle();
            match tokio::time::timeout(STAGE_DRAIN_TIMEOUT, stage).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(pipeline = %self.name, "Processor stage ended abnormally: {}", e),
                Err(_) => {
                    warn!(pipeline = %self.name, "Processor stage did not drain in time, aborting");
                    abort.abort();
                }
            }
        }

        if let Some(sink) = &self.sink {
            sink.stop().await;
        }

        info!(pipeline = %self.name, "Pipeline stopped");
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field(
                "sources",
                &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field(
                "processors",
                &self.processors.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("sink", &self.sink.as_ref().map(|s| s.name()))
            .field("running", &self.is_running())
            .finish()
    }
}

/// Merge per-source streams into one
///
/// One reader task per stream forwards into the merged stream until its stream
/// ends or `cancel` fires, then closes its stream so the source sees the close.
fn converge(
    pipeline: &str,
    streams: Vec<BatchReceiver>,
    cancel: &CancellationToken,
) -> (BatchReceiver, Vec<JoinHandle<()>>) {
    let (merged_tx, merged_rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);

    let readers = streams
        .into_iter()
        .enumerate()
        .map(|(index, mut stream)| {
            let merged = merged_tx.clone();
            let cancel = cancel.clone();
            let pipeline = pipeline.to_string();
            tokio::spawn(async move {
                loop {
                    let batch = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        batch = stream.recv() => batch,
                    };
                    let Some(batch) = batch else {
                        break;
                    };
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = merged.send(batch) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                stream.close();
                debug!(%pipeline, stream = index, "Source stream closed");
            })
        })
        .collect();

    (merged_rx, readers)
}

/// Chain processors over `input`
///
/// Every stage but the last writes into a stream of the stage capacity; the last
/// writes into the sink-facing stream. With no processors `input` is returned as is.
fn serialize(
    pipeline: &str,
    input: BatchReceiver,
    processors: &[Arc<dyn Processor>],
) -> (BatchReceiver, Vec<JoinHandle<()>>) {
    let mut upstream = input;
    let mut stages = Vec::with_capacity(processors.len());

    for (index, processor) in processors.iter().enumerate() {
        let capacity = if index + 1 == processors.len() {
            SINK_CHANNEL_CAPACITY
        } else {
            STAGE_CHANNEL_CAPACITY
        };
        let (tx, rx) = mpsc::channel(capacity);
        let processor = Arc::clone(processor);
        let pipeline = pipeline.to_string();
        let input = std::mem::replace(&mut upstream, rx);

        stages.push(tokio::spawn(async move {
            if let Err(e) = processor.start(input, tx).await {
                warn!(%pipeline, processor = %processor.name(), error = %e, "Processor stage failed");
            }
        }));
    }

    (upstream, stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::testing::{CallLog, CollectingSink, MockSource, TagProcessor};

    fn numbered(source: usize, count: usize) -> Vec<Message> {
        (0..count)
            .map(|i| Message::metric(format!("s{source}_m{i}"), i as f64))
            .collect()
    }

    #[tokio::test]
    async fn test_converge_merges_all_sources() {
        let log = CallLog::default();
        let sink = Arc::new(CollectingSink::new("collect", log.clone()));
        let mut pipeline = Pipeline::new("fan-in").with_sink(sink.clone());
        for i in 0..5 {
            let source = MockSource::new(format!("src{i}"), log.clone())
                .with_batch(numbered(i, 3))
                .with_batch(numbered(i + 10, 2));
            pipeline = pipeline.with_source(Arc::new(source));
        }

        pipeline.start().await.unwrap();
        assert!(sink.wait_for(25, Duration::from_secs(5)).await);
        pipeline.stop().await;

        let mut names: Vec<String> = sink.messages().into_iter().map(|m| m.name).collect();
        assert_eq!(names.len(), 25);
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 25);
    }

    #[tokio::test]
    async fn test_converge_closes_after_every_reader() {
        let cancel = CancellationToken::new();
        let mut txs = Vec::new();
        let mut streams = Vec::new();
        for _ in 0..5 {
            let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);
            txs.push(tx);
            streams.push(rx);
        }
        let (mut merged, readers) = converge("test", streams, &cancel);

        // Close all but one source
        let last = txs.pop().unwrap();
        for (i, tx) in txs.into_iter().enumerate() {
            tx.send(numbered(i, 1)).await.unwrap();
        }

        let mut received = 0;
        for _ in 0..4 {
            received += merged.recv().await.unwrap().len();
        }
        assert_eq!(received, 4);
        // The remaining reader still holds the merged stream open
        assert!(tokio::time::timeout(Duration::from_millis(50), merged.recv())
            .await
            .is_err());

        last.send(numbered(4, 1)).await.unwrap();
        drop(last);
        assert_eq!(merged.recv().await.unwrap().len(), 1);
        assert!(merged.recv().await.is_none());

        for reader in readers {
            reader.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_processor_chain_applies_in_order() {
        let log = CallLog::default();
        let sink = Arc::new(CollectingSink::new("collect", log.clone()));
        let source = MockSource::new("src", log.clone()).with_batch(vec![
            Message::metric("a", 1.0),
            Message::metric("b", 2.0),
        ]);

        let mut pipeline = Pipeline::new("chain")
            .with_source(Arc::new(source))
            .with_processor(Arc::new(TagProcessor::new("p1", "stage", "one", log.clone())))
            .with_processor(Arc::new(TagProcessor::new("p2", "second", "two", log.clone())))
            .with_sink(sink.clone());

        pipeline.start().await.unwrap();
        assert!(sink.wait_for(2, Duration::from_secs(5)).await);
        pipeline.stop().await;

        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        for message in messages {
            assert_eq!(message.tags.get("stage").map(String::as_str), Some("one"));
            assert_eq!(message.tags.get("second").map(String::as_str), Some("two"));
            assert_eq!(message.tags.get("trail").map(String::as_str), Some("p1>p2"));
        }
    }

    #[tokio::test]
    async fn test_start_then_stop_stops_each_component_once() {
        let log = CallLog::default();
        let mut pipeline = Pipeline::new("lifecycle")
            .with_source(Arc::new(MockSource::new("s1", log.clone()).streaming()))
            .with_source(Arc::new(MockSource::new("s2", log.clone()).streaming()))
            .with_processor(Arc::new(TagProcessor::new("p1", "k", "v", log.clone())))
            .with_sink(Arc::new(CollectingSink::new("sink", log.clone())));

        pipeline.start().await.unwrap();
        assert!(pipeline.is_running());
        pipeline.stop().await;
        assert!(!pipeline.is_running());
        // Second stop is a no-op
        pipeline.stop().await;

        for component in ["source:s1", "source:s2", "processor:p1", "sink:sink"] {
            assert_eq!(log.count(&format!("{component}:stop")), 1, "{component}");
        }

        // Sources stop before processors, processors before the sink
        let entries = log.entries();
        let position = |entry: &str| entries.iter().position(|e| e == entry).unwrap();
        assert!(position("source:s1:stop") < position("processor:p1:stop"));
        assert!(position("source:s2:stop") < position("processor:p1:stop"));
        assert!(position("processor:p1:stop") < position("sink:sink:stop"));
    }

    #[tokio::test]
    async fn test_start_rejects_missing_sources_or_sink() {
        let log = CallLog::default();

        let mut no_sources =
            Pipeline::new("empty").with_sink(Arc::new(CollectingSink::new("sink", log.clone())));
        assert!(matches!(
            no_sources.start().await,
            Err(PipelineError::NoSources { .. })
        ));

        let mut no_sink =
            Pipeline::new("headless").with_source(Arc::new(MockSource::new("s", log.clone())));
        assert!(matches!(
            no_sink.start().await,
            Err(PipelineError::NoSink { .. })
        ));

        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_source_start_failure_cleans_up() {
        let log = CallLog::default();
        let mut pipeline = Pipeline::new("broken")
            .with_source(Arc::new(MockSource::new("good", log.clone()).streaming()))
            .with_source(Arc::new(MockSource::new("bad", log.clone()).failing()))
            .with_sink(Arc::new(CollectingSink::new("sink", log.clone())));

        let err = pipeline.start().await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceStart { ref plugin, .. } if plugin == "bad"));
        assert!(!pipeline.is_running());

        assert_eq!(log.count("source:good:stop"), 1);
        assert_eq!(log.count("source:bad:stop"), 1);
        // The sink never started but is still stopped as cleanup
        assert_eq!(log.count("sink:sink:start"), 0);
        assert_eq!(log.count("sink:sink:stop"), 1);
    }

    #[tokio::test]
    async fn test_sink_start_failure_cleans_up() {
        let log = CallLog::default();
        let mut pipeline = Pipeline::new("broken-sink")
            .with_source(Arc::new(MockSource::new("s", log.clone()).streaming()))
            .with_sink(Arc::new(CollectingSink::new("sink", log.clone()).failing()));

        let err = pipeline.start().await.unwrap_err();
        assert!(matches!(err, PipelineError::SinkStart { .. }));
        assert_eq!(log.count("source:s:stop"), 1);
        assert_eq!(log.count("sink:sink:stop"), 1);

        // The pipeline can be started again once the cause is gone
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let log = CallLog::default();
        let mut pipeline = Pipeline::new("twice")
            .with_source(Arc::new(MockSource::new("s", log.clone()).streaming()))
            .with_sink(Arc::new(CollectingSink::new("sink", log.clone())));

        pipeline.start().await.unwrap();
        assert!(matches!(
            pipeline.start().await,
            Err(PipelineError::AlreadyRunning { .. })
        ));
        pipeline.stop().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_processor_batch_is_isolated() {
        let log = CallLog::default();
        let sink = Arc::new(CollectingSink::new("collect", log.clone()));
        let source = MockSource::new("src", log.clone())
            .with_batch(vec![Message::metric("poison", 0.0)])
            .with_batch(vec![Message::metric("fine", 1.0)]);

        let mut pipeline = Pipeline::new("isolated")
            .with_source(Arc::new(source))
            .with_processor(Arc::new(
                TagProcessor::new("p1", "k", "v", log.clone()).rejecting("poison"),
            ))
            .with_sink(sink.clone());

        pipeline.start().await.unwrap();
        assert!(sink.wait_for(1, Duration::from_secs(5)).await);
        pipeline.stop().await;

        let names: Vec<String> = sink.messages().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["fine"]);
    }
}

//! Pipeline manager
//!
//! Owns the running pipelines of every module. Lifecycle events are queued and
//! drained by a single control loop, which hands the actual start/stop work to
//! the worker pool under a per-task timeout and immediately goes back to the
//! queue. Each event carries a one-shot reply slot that is completed by the job
//! itself or, if the job times out or is dropped, by a watcher on the job.
//!
//! ```text
//! handle_pipeline_event ──► [event queue] ──► control loop ──► WorkerPool
//!        ▲                                                         │
//!        └──────────────── CallbackEvent (first writer wins) ◄─────┘
//! ```
//!
//! Two events for the same module can be in flight on different workers at
//! once, so their effects are not guaranteed to apply in submission order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nodewatch_executor::{WorkerPool, WorkerPoolError};
use nodewatch_pipeline::Pipeline;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument, Span};

use crate::config::ControlConfig;
use crate::error::{ControlError, Result};
use crate::event::{CallbackEvent, EventKind};

/// A lifecycle request for one module
#[derive(Debug)]
pub struct PipelineRequest {
    pub kind: EventKind,
    pub module: String,
    /// New pipeline set; empty for deletes
    pub pipelines: Vec<Pipeline>,
}

impl PipelineRequest {
    pub fn add(module: impl Into<String>, pipelines: Vec<Pipeline>) -> Self {
        Self {
            kind: EventKind::Add,
            module: module.into(),
            pipelines,
        }
    }

    pub fn update(module: impl Into<String>, pipelines: Vec<Pipeline>) -> Self {
        Self {
            kind: EventKind::Update,
            module: module.into(),
            pipelines,
        }
    }

    pub fn delete(module: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Delete,
            module: module.into(),
            pipelines: Vec::new(),
        }
    }
}

/// Queued request with its reply channel and the caller's span
struct PipelineEvent {
    request: PipelineRequest,
    reply: oneshot::Sender<CallbackEvent>,
    span: Span,
}

/// Reply channel shared by a job and its timeout watcher
#[derive(Clone)]
struct CallbackSlot(Arc<SyncMutex<Option<oneshot::Sender<CallbackEvent>>>>);

impl CallbackSlot {
    fn new(reply: oneshot::Sender<CallbackEvent>) -> Self {
        Self(Arc::new(SyncMutex::new(Some(reply))))
    }

    /// Deliver `callback` unless something was already delivered
    fn complete(&self, callback: CallbackEvent) {
        let reply = self.0.lock().take();
        match reply {
            Some(reply) => {
                // The caller may have given up waiting
                let _ = reply.send(callback);
            }
            None => debug!(description = %callback.description, "Late callback discarded"),
        }
    }
}

struct PipelineState {
    pipelines: HashMap<String, Vec<Pipeline>>,
    /// Whether registered pipelines should be running
    loaded: bool,
    /// Set on shutdown; jobs finishing later stop what they started
    closed: bool,
}

struct Inner {
    pool: Arc<WorkerPool>,
    task_timeout: Duration,
    state: Mutex<PipelineState>,
}

/// Authoritative map of module name to running pipelines
pub struct PipelineManager {
    inner: Arc<Inner>,
    events_tx: mpsc::Sender<PipelineEvent>,
    events_rx: SyncMutex<Option<mpsc::Receiver<PipelineEvent>>>,
    control_loop: SyncMutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl PipelineManager {
    /// Create a manager dispatching work onto `pool`
    ///
    /// Events are only processed once [`start`](Self::start) is called.
    pub fn new(pool: Arc<WorkerPool>, config: &ControlConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                pool,
                task_timeout: config.task_timeout,
                state: Mutex::new(PipelineState {
                    pipelines: HashMap::new(),
                    loaded: true,
                    closed: false,
                }),
            }),
            events_tx,
            events_rx: SyncMutex::new(Some(events_rx)),
            control_loop: SyncMutex::new(None),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the control loop
    pub fn start(&self) -> Result<()> {
        let events_rx = self
            .events_rx
            .lock()
            .take()
            .ok_or_else(|| ControlError::internal("pipeline manager already started"))?;

        let handle = tokio::spawn(control_loop(
            Arc::clone(&self.inner),
            events_rx,
            self.cancel.clone(),
        ));
        *self.control_loop.lock() = Some(handle);
        self.running.store(true, Ordering::Release);
        info!("Pipeline manager started");
        Ok(())
    }

    /// Queue a lifecycle event and wait for its callback
    #[instrument(skip(self, request), fields(module = %request.module, event = %request.kind))]
    pub async fn handle_pipeline_event(&self, request: PipelineRequest) -> CallbackEvent {
        if !self.running.load(Ordering::Acquire) {
            return CallbackEvent::failed(ControlError::Closed);
        }

        let (reply, callback) = oneshot::channel();
        let event = PipelineEvent {
            request,
            reply,
            span: Span::current(),
        };
        if self.events_tx.send(event).await.is_err() {
            return CallbackEvent::failed(ControlError::Closed);
        }

        callback
            .await
            .unwrap_or_else(|_| CallbackEvent::failed(ControlError::internal("callback dropped")))
    }

    pub async fn add(&self, module: &str, pipelines: Vec<Pipeline>) -> Result<String> {
        self.handle_pipeline_event(PipelineRequest::add(module, pipelines))
            .await
            .into_result()
    }

    pub async fn update(&self, module: &str, pipelines: Vec<Pipeline>) -> Result<String> {
        self.handle_pipeline_event(PipelineRequest::update(module, pipelines))
            .await
            .into_result()
    }

    pub async fn delete(&self, module: &str) -> Result<String> {
        self.handle_pipeline_event(PipelineRequest::delete(module))
            .await
            .into_result()
    }

    /// Start every registered pipeline
    ///
    /// Fails if pipelines are already loaded. If any pipeline fails to start,
    /// everything started by this call is stopped again and the manager stays
    /// unloaded.
    #[instrument(skip(self))]
    pub async fn pipeline_load(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(ControlError::Closed);
        }
        if state.loaded {
            return Err(ControlError::AlreadyLoaded);
        }

        let mut failure = None;
        for (module, pipelines) in state.pipelines.iter_mut() {
            if let Err(e) = start_all(module, pipelines).await {
                failure = Some(e);
                break;
            }
        }

        if let Some(error) = failure {
            for pipelines in state.pipelines.values_mut() {
                stop_all(pipelines).await;
            }
            error!(error = %error, "Loading pipelines failed, rolled back");
            return Err(error);
        }

        state.loaded = true;
        info!(modules = state.pipelines.len(), "Pipelines loaded");
        Ok(true)
    }

    /// Stop every registered pipeline, keeping them registered
    ///
    /// Returns `false` if pipelines were already unloaded.
    #[instrument(skip(self))]
    pub async fn pipeline_unload(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        if !state.loaded {
            debug!("Pipelines already unloaded");
            return Ok(false);
        }

        for pipelines in state.pipelines.values_mut() {
            stop_all(pipelines).await;
        }
        state.loaded = false;
        info!(modules = state.pipelines.len(), "Pipelines unloaded");
        Ok(true)
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.state.lock().await.loaded
    }

    /// Modules with registered pipelines, sorted
    pub async fn module_names(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        let mut names: Vec<String> = state.pipelines.keys().cloned().collect();
        names.sort();
        names
    }

    /// Pipeline names of `module` in definition order
    pub async fn pipeline_names(&self, module: &str) -> Option<Vec<String>> {
        let state = self.inner.state.lock().await;
        state
            .pipelines
            .get(module)
            .map(|pipelines| pipelines.iter().map(|p| p.name().to_string()).collect())
    }

    /// Whether every pipeline of `module` is running
    pub async fn is_running(&self, module: &str) -> bool {
        let state = self.inner.state.lock().await;
        state
            .pipelines
            .get(module)
            .is_some_and(|pipelines| pipelines.iter().all(Pipeline::is_running))
    }

    /// Stop the control loop and every pipeline
    ///
    /// Events still queued are answered with [`ControlError::Closed`]. Jobs
    /// already running on the pool stop whatever they started and report
    /// `Closed`; close the pool afterwards to wait for them.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.cancel.cancel();

        let handle = self.control_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Pipeline manager control loop panicked: {}", e);
            }
        }

        let mut state = self.inner.state.lock().await;
        state.closed = true;
        for (module, mut pipelines) in state.pipelines.drain() {
            debug!(%module, "Stopping pipelines on shutdown");
            stop_all(&mut pipelines).await;
        }
        info!("Pipeline manager stopped");
    }
}

impl std::fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineManager")
            .field("task_timeout", &self.inner.task_timeout)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

async fn control_loop(
    inner: Arc<Inner>,
    mut events: mpsc::Receiver<PipelineEvent>,
    cancel: CancellationToken,
) {
    debug!("Pipeline control loop running");
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        dispatch(&inner, event).await;
    }

    events.close();
    while let Ok(event) = events.try_recv() {
        let _ = event.reply.send(CallbackEvent::failed(ControlError::Closed));
    }
    debug!("Pipeline control loop exited");
}

/// Submit one event's work to the pool and arrange for its callback
async fn dispatch(inner: &Arc<Inner>, event: PipelineEvent) {
    let PipelineEvent {
        request,
        reply,
        span,
    } = event;
    let kind = request.kind;
    let module = request.module.clone();
    let job_name = format!("{}-{}", module, kind);
    let slot = CallbackSlot::new(reply);

    let work = {
        let inner = Arc::clone(inner);
        let slot = slot.clone();
        async move {
            let result = apply(&inner, request).await;
            slot.complete(CallbackEvent::from(result));
            Ok::<(), anyhow::Error>(())
        }
        .instrument(span)
    };

    let timeout = inner.task_timeout;
    match inner.pool.put_with_timeout(job_name, work, timeout).await {
        Ok(handle) => {
            tokio::spawn(async move {
                match handle.wait().await {
                    Ok(()) => {}
                    Err(WorkerPoolError::Timeout { .. }) => {
                        warn!(%module, event = %kind, ?timeout, "Pipeline job timed out");
                        slot.complete(CallbackEvent::failed(ControlError::Timeout {
                            module,
                            operation: kind,
                            timeout,
                        }));
                    }
                    Err(e) => slot.complete(CallbackEvent::failed(e.into())),
                }
            });
        }
        Err(WorkerPoolError::Closed) => slot.complete(CallbackEvent::failed(ControlError::Closed)),
        Err(e) => slot.complete(CallbackEvent::failed(e.into())),
    }
}

/// Apply one request to the pipeline map
///
/// The map lock is only held to read and write entries; pipelines are started
/// and stopped outside of it.
async fn apply(inner: &Inner, request: PipelineRequest) -> Result<String> {
    let PipelineRequest {
        kind,
        module,
        mut pipelines,
    } = request;

    match kind {
        EventKind::Add => {
            let loaded = {
                let state = inner.state.lock().await;
                if state.closed {
                    return Err(ControlError::Closed);
                }
                if state.pipelines.contains_key(&module) {
                    return Err(ControlError::AlreadyExists { module });
                }
                state.loaded
            };

            if loaded {
                start_all(&module, &mut pipelines).await?;
            }
            let count = pipelines.len();
            insert(inner, &module, pipelines, loaded).await?;
            info!(%module, pipelines = count, started = loaded, "Module added");
            Ok(format!("added {count} pipelines to module '{module}'"))
        }
        EventKind::Update => {
            let (mut old, loaded) = {
                let mut state = inner.state.lock().await;
                match state.pipelines.remove(&module) {
                    Some(old) => (old, state.loaded),
                    None => return Err(ControlError::NotFound { module }),
                }
            };

            stop_all(&mut old).await;

            if loaded {
                if let Err(e) = start_all(&module, &mut pipelines).await {
                    // The entry keeps the old, now stopped, set so later updates still find it
                    warn!(%module, "New pipelines failed to start, module left without running pipelines");
                    let mut state = inner.state.lock().await;
                    if !state.closed {
                        state.pipelines.entry(module.clone()).or_insert(old);
                    }
                    return Err(e);
                }
            }
            drop(old);
            let count = pipelines.len();
            insert(inner, &module, pipelines, loaded).await?;
            info!(%module, pipelines = count, started = loaded, "Module updated");
            Ok(format!("updated module '{module}' with {count} pipelines"))
        }
        EventKind::Delete => {
            let old = inner.state.lock().await.pipelines.remove(&module);
            match old {
                Some(mut old) => {
                    stop_all(&mut old).await;
                    info!(%module, pipelines = old.len(), "Module deleted");
                    Ok(format!("deleted module '{module}'"))
                }
                None => {
                    debug!(%module, "Nothing to delete");
                    Ok(format!("module '{module}' has no pipelines"))
                }
            }
        }
    }
}

/// Insert a pipeline set, reconciling with the map state at insert time
///
/// `started` tells whether the set was started under the load state read
/// earlier. If another event registered the module in the meantime, or the
/// manager shut down, the new set is stopped and rejected.
async fn insert(inner: &Inner, module: &str, mut pipelines: Vec<Pipeline>, started: bool) -> Result<()> {
    let mut state = inner.state.lock().await;

    if state.closed {
        warn!(%module, "Manager shut down while the job ran, stopping its pipelines");
        stop_all(&mut pipelines).await;
        return Err(ControlError::Closed);
    }

    if state.pipelines.contains_key(module) {
        stop_all(&mut pipelines).await;
        return Err(ControlError::AlreadyExists {
            module: module.to_string(),
        });
    }

    if started && !state.loaded {
        stop_all(&mut pipelines).await;
    } else if !started && state.loaded {
        start_all(module, &mut pipelines).await?;
    }

    state.pipelines.insert(module.to_string(), pipelines);
    Ok(())
}

/// Start every pipeline of a set; on failure stop the whole set
async fn start_all(module: &str, pipelines: &mut [Pipeline]) -> Result<()> {
    for index in 0..pipelines.len() {
        let pipeline = &mut pipelines[index];
        if let Err(error) = pipeline.start().await {
            error!(%module, pipeline = %pipeline.name(), error = %error, "Pipeline failed to start");
            stop_all(pipelines).await;
            return Err(ControlError::Start {
                module: module.to_string(),
                error,
            });
        }
    }
    Ok(())
}

async fn stop_all(pipelines: &mut [Pipeline]) {
    for pipeline in pipelines.iter_mut() {
        pipeline.stop().await;
    }
}

//! Worker pool for job execution
//!
//! Runs named jobs on a fixed number of workers with graceful shutdown.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Pool name, used in logs
    pub name: String,

    /// Number of concurrent workers
    pub workers: usize,

    /// Capacity of the job queue (must be >= workers)
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            workers: 4,
            queue_capacity: 64,
        }
    }
}

impl WorkerPoolConfig {
    /// Create a new worker pool configuration
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            ..Default::default()
        }
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), WorkerPoolError> {
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err(WorkerPoolError::InvalidConfig(
                "workers and queue_capacity must be greater than zero".into(),
            ));
        }
        if self.workers > self.queue_capacity {
            return Err(WorkerPoolError::InvalidConfig(format!(
                "workers ({}) must not exceed queue_capacity ({})",
                self.workers, self.queue_capacity
            )));
        }
        Ok(())
    }
}

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerPoolError {
    /// Invalid configuration
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),

    /// Pool no longer accepts jobs
    #[error("worker pool is closed")]
    Closed,

    /// Job exceeded its timeout
    #[error("job {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    /// Job returned an error or panicked
    #[error("job {name} failed: {message}")]
    JobFailed { name: String, message: String },

    /// Job was discarded before it ran (pool closed with the job still queued)
    #[error("job {name} was dropped before completion")]
    Dropped { name: String },
}

type JobFuture = BoxFuture<'static, Result<(), WorkerPoolError>>;

struct Job {
    name: String,
    future: JobFuture,
    outcome: oneshot::Sender<Result<(), WorkerPoolError>>,
}

/// Completion signal for a submitted job
///
/// Dropping the handle does not affect the job.
#[derive(Debug)]
pub struct JobHandle {
    name: String,
    outcome: oneshot::Receiver<Result<(), WorkerPoolError>>,
}

impl JobHandle {
    /// Job name as submitted
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the job to finish, time out, or be dropped
    pub async fn wait(self) -> Result<(), WorkerPoolError> {
        match self.outcome.await {
            Ok(result) => result,
            Err(_) => Err(WorkerPoolError::Dropped { name: self.name }),
        }
    }
}

/// Fixed-size worker pool backed by a bounded queue
///
/// # Example
///
/// ```ignore
/// use nodewatch_executor::worker::{WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new(4, 16))?;
///
/// pool.put("flush", async move {
///     flush().await?;
///     Ok(())
/// })
/// .await?;
///
/// // ... later, stop all workers
/// pool.close().await;
/// ```
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: mpsc::Sender<Job>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a worker pool and spawn its workers
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, WorkerPoolError> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = (0..config.workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    config.name.clone(),
                    id,
                    Arc::clone(&receiver),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(
            pool = %config.name,
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Ok(Self {
            config,
            sender,
            closed: AtomicBool::new(false),
            shutdown_tx,
            workers: parking_lot::Mutex::new(workers),
        })
    }

    /// Pool configuration
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Submit a job
    ///
    /// Waits for queue space when the queue is full. Errors returned by the job
    /// are logged by the worker and reported through the returned handle.
    pub async fn put<F>(&self, name: impl Into<String>, job: F) -> Result<JobHandle, WorkerPoolError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let job_name = name.clone();
        let future = async move {
            job.await.map_err(|e| WorkerPoolError::JobFailed {
                name: job_name,
                message: format!("{e:#}"),
            })
        };
        self.enqueue(name, future.boxed()).await
    }

    /// Submit a job bounded by `timeout`
    ///
    /// The job runs on its own task. When the timeout elapses the worker is released
    /// and a [`WorkerPoolError::Timeout`] is reported, while the original task keeps
    /// running in the background until it finishes on its own.
    pub async fn put_with_timeout<F>(
        &self,
        name: impl Into<String>,
        job: F,
        timeout: Duration,
    ) -> Result<JobHandle, WorkerPoolError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let job_name = name.clone();
        let future = async move {
            let task = tokio::spawn(job);
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(WorkerPoolError::JobFailed {
                    name: job_name,
                    message: format!("{e:#}"),
                }),
                Ok(Err(join_error)) => Err(WorkerPoolError::JobFailed {
                    name: job_name,
                    message: join_error.to_string(),
                }),
                Err(_) => Err(WorkerPoolError::Timeout {
                    name: job_name,
                    timeout,
                }),
            }
        };
        self.enqueue(name, future.boxed()).await
    }

    async fn enqueue(&self, name: String, future: JobFuture) -> Result<JobHandle, WorkerPoolError> {
        if self.is_closed() {
            debug!(pool = %self.config.name, job = %name, "Rejected job on closed pool");
            return Err(WorkerPoolError::Closed);
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let job = Job {
            name: name.clone(),
            future,
            outcome: outcome_tx,
        };

        self.sender
            .send(job)
            .await
            .map_err(|_| WorkerPoolError::Closed)?;

        Ok(JobHandle {
            name,
            outcome: outcome_rx,
        })
    }

    /// Stop accepting jobs, signal all workers and wait for them to exit
    ///
    /// Jobs currently executing run to completion. Jobs still queued are dropped and
    /// their handles resolve to [`WorkerPoolError::Dropped`].
    #[instrument(skip(self), fields(pool = %self.config.name))]
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(pool = %self.config.name, "Closing worker pool");
        let _ = self.shutdown_tx.send(true);

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                error!(pool = %self.config.name, "Worker exited abnormally: {}", e);
            }
        }

        info!(pool = %self.config.name, "Worker pool closed");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_worker(
    pool: String,
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(%pool, worker = id, "Worker started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let next = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => None,
            job = async { queue.lock().await.recv().await } => job,
        };

        let Some(Job {
            name,
            future,
            outcome,
        }) = next
        else {
            break;
        };

        debug!(%pool, worker = id, job = %name, "Executing job");
        let result = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(WorkerPoolError::JobFailed {
                name: name.clone(),
                message: "job panicked".to_string(),
            }),
        };

        if let Err(e) = &result {
            warn!(%pool, worker = id, job = %name, error = %e, "Job did not complete");
        }
        let _ = outcome.send(result);
    }

    debug!(%pool, worker = id, "Worker exited");
}

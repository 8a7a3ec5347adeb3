//! Cancellable retry controller

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::{Backoff, ExponentialBackoff};

/// Configuration for retried operations
///
/// # Example
///
/// ```
/// use nodewatch_executor::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::default()
///     .with_max_attempts(5)
///     .with_initial_interval(Duration::from_secs(1))
///     .with_max_interval(Duration::from_secs(30));
///
/// assert!(config.has_attempts_remaining(4));
/// assert!(!config.has_attempts_remaining(5));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts per run (0 = unlimited)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "crate::duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "crate::duration_millis")]
    pub max_interval: Duration,

    /// Upper bound on a single attempt
    #[serde(with = "crate::duration_millis")]
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(90),
        }
    }
}

impl RetryConfig {
    /// Set the maximum number of attempts (0 = unlimited)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Default backoff for this configuration
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.initial_interval, self.max_interval)
    }

    /// Check if another attempt is allowed after `attempts` attempts
    pub fn has_attempts_remaining(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }
}

/// A retryable unit of work
///
/// Called once per attempt; `Ok(())` ends the run.
pub type RetryOperation = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Build a [`RetryOperation`] from an async closure
pub fn retry_operation<F, Fut>(f: F) -> RetryOperation
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Whether a controller has a run in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    /// No attempt sequence in flight
    Idle,
    /// An attempt sequence is in flight
    Running,
}

impl fmt::Display for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// An attempt succeeded
    Succeeded { attempts: u32 },
    /// `max_attempts` reached without success
    Exhausted { attempts: u32 },
    /// Cancelled externally; the interrupted attempt is not counted
    Cancelled { attempts: u32 },
}

struct ActiveRun {
    token: CancellationToken,
    handle: JoinHandle<RunOutcome>,
    done: watch::Receiver<Option<RunOutcome>>,
}

/// Runs at most one retry sequence at a time
///
/// Starting a new run cancels the current one and waits for it to exit before
/// the new run begins, so the operation never observes two overlapping runs.
///
/// # State Machine
///
/// ```text
/// ┌──────┐  run()   ┌─────────┐  success / exhausted / cancel  ┌──────┐
/// │ Idle │ ───────► │ Running │ ─────────────────────────────► │ Idle │
/// └──────┘          └─────────┘                                 └──────┘
///                        │ run() while running:
///                        │ cancel, wait for exit, restart
///                        ▼
///                   ┌─────────┐
///                   │ Running │
///                   └─────────┘
/// ```
pub struct RetryController {
    name: String,
    config: RetryConfig,
    backoff: Arc<parking_lot::Mutex<Box<dyn Backoff>>>,
    attempts: Arc<AtomicU32>,
    active: Mutex<Option<ActiveRun>>,
}

impl RetryController {
    /// Create a controller using the config's exponential backoff
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        let backoff = config.backoff();
        Self::with_backoff(name, config, backoff)
    }

    /// Create a controller with a custom backoff strategy
    pub fn with_backoff(
        name: impl Into<String>,
        config: RetryConfig,
        backoff: impl Backoff + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            backoff: Arc::new(parking_lot::Mutex::new(Box::new(backoff))),
            attempts: Arc::new(AtomicU32::new(0)),
            active: Mutex::new(None),
        }
    }

    /// Controller name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attempts made by the current (or last) run
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Current state
    pub async fn state(&self) -> RetryState {
        match self.active.lock().await.as_ref() {
            Some(run) if !run.handle.is_finished() => RetryState::Running,
            _ => RetryState::Idle,
        }
    }

    /// Start a new run of `operation`
    ///
    /// Cancels and waits out any run already in flight, resets the attempt counter
    /// and backoff, then launches the new run and returns without waiting for it.
    #[instrument(skip(self, operation), fields(controller = %self.name))]
    pub async fn run(&self, operation: RetryOperation) {
        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            debug!(controller = %self.name, "Replacing in-flight run");
            stop_run(&self.name, previous).await;
        }

        self.attempts.store(0, Ordering::Release);
        self.backoff.lock().reset();

        let token = CancellationToken::new();
        let (done_tx, done) = watch::channel(None);
        let run = run_loop(
            self.name.clone(),
            self.config.clone(),
            Arc::clone(&self.backoff),
            Arc::clone(&self.attempts),
            operation,
            token.clone(),
        );
        let handle = tokio::spawn(async move {
            let outcome = run.await;
            done_tx.send_replace(Some(outcome));
            outcome
        });

        *active = Some(ActiveRun {
            token,
            handle,
            done,
        });
    }

    /// Cancel the in-flight run, if any, and wait for it to exit
    #[instrument(skip(self), fields(controller = %self.name))]
    pub async fn cancel(&self) -> Option<RunOutcome> {
        // The slot stays locked until the run has exited so no new run can start meanwhile
        let mut active = self.active.lock().await;
        let previous = active.take()?;
        stop_run(&self.name, previous).await
    }

    /// Wait for the current run to end
    ///
    /// The run stays in place while waiting, so a concurrent [`run`](Self::run)
    /// still cancels it first; the waiter then sees `Cancelled`. Returns `None`
    /// when no run was started since the last cancel, or if the run panicked.
    pub async fn wait(&self) -> Option<RunOutcome> {
        let mut done = {
            let active = self.active.lock().await;
            active.as_ref()?.done.clone()
        };
        let outcome = match done.wait_for(Option::is_some).await {
            Ok(outcome) => *outcome,
            Err(_) => {
                error!(controller = %self.name, "Retry run ended without an outcome");
                None
            }
        };
        outcome
    }
}

impl fmt::Debug for RetryController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryController")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("attempts", &self.attempts())
            .finish()
    }
}

async fn stop_run(name: &str, run: ActiveRun) -> Option<RunOutcome> {
    run.token.cancel();
    match run.handle.await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(controller = %name, "Retry run panicked: {}", e);
            None
        }
    }
}

async fn run_loop(
    name: String,
    config: RetryConfig,
    backoff: Arc<parking_lot::Mutex<Box<dyn Backoff>>>,
    attempts: Arc<AtomicU32>,
    operation: RetryOperation,
    token: CancellationToken,
) -> RunOutcome {
    loop {
        let completed = attempts.load(Ordering::Acquire);
        let delay = backoff.lock().next_duration();
        if !delay.is_zero() {
            debug!(controller = %name, delay_ms = delay.as_millis() as u64, "Waiting before next attempt");
        }

        tokio::select! {
            _ = token.cancelled() => {
                debug!(controller = %name, "Run cancelled during backoff");
                return RunOutcome::Cancelled { attempts: completed };
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let attempt = completed + 1;
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(controller = %name, attempt, "Run cancelled during attempt");
                return RunOutcome::Cancelled { attempts: completed };
            }
            result = tokio::time::timeout(config.attempt_timeout, operation()) => result,
        };
        attempts.store(attempt, Ordering::Release);

        match result {
            Ok(Ok(())) => {
                info!(controller = %name, attempt, "Operation succeeded");
                return RunOutcome::Succeeded { attempts: attempt };
            }
            Ok(Err(e)) => {
                warn!(controller = %name, attempt, error = %format!("{e:#}"), "Attempt failed");
            }
            Err(_) => {
                warn!(
                    controller = %name,
                    attempt,
                    timeout_ms = config.attempt_timeout.as_millis() as u64,
                    "Attempt timed out"
                );
            }
        }

        if !config.has_attempts_remaining(attempt) {
            error!(controller = %name, attempts = attempt, "Giving up after maximum attempts");
            return RunOutcome::Exhausted { attempts: attempt };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn fast_config() -> RetryConfig {
        RetryConfig::default()
            .with_initial_interval(Duration::from_millis(1))
            .with_max_interval(Duration::from_millis(2))
            .with_attempt_timeout(Duration::from_secs(5))
    }

    /// Decrements the shared counter when the attempt future is dropped
    struct InFlight(Arc<AtomicI32>);

    impl Drop for InFlight {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Operation tracking how many attempts are alive at once
    fn exclusive_op(
        in_flight: &Arc<AtomicI32>,
        max_seen: &Arc<AtomicI32>,
        hold: Duration,
    ) -> RetryOperation {
        let in_flight = Arc::clone(in_flight);
        let max_seen = Arc::clone(max_seen);
        retry_operation(move || {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                let _guard = InFlight(Arc::clone(&in_flight));
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(hold).await;
                Ok(())
            }
        })
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 0);
        assert_eq!(config.initial_interval, Duration::from_secs(1));
        assert_eq!(config.max_interval, Duration::from_secs(30));
        assert!(config.has_attempts_remaining(u32::MAX - 1));
    }

    #[test]
    fn test_serialization() {
        let config = RetryConfig::default().with_max_attempts(10);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"initial_interval\":1000"));

        let parsed: RetryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[tokio::test]
    async fn test_success_stops_retrying() {
        let controller = RetryController::new("ok", fast_config());
        let calls = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&calls);
        controller
            .run(retry_operation(move || {
                let c = Arc::clone(&c);
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        anyhow::bail!("not ready yet");
                    }
                    Ok(())
                }
            }))
            .await;

        assert_eq!(
            controller.wait().await,
            Some(RunOutcome::Succeeded { attempts: 3 })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(controller.state().await, RetryState::Idle);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let controller = RetryController::new("failing", fast_config().with_max_attempts(3));
        let calls = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&calls);
        controller
            .run(retry_operation(move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("still broken"))
                }
            }))
            .await;

        assert_eq!(
            controller.wait().await,
            Some(RunOutcome::Exhausted { attempts: 3 })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(controller.attempts(), 3);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_retry() {
        let config = fast_config().with_attempt_timeout(Duration::from_millis(50));
        let controller = RetryController::new("timeout", config);
        let calls = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&calls);
        controller
            .run(retry_operation(move || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        std::future::pending::<()>().await;
                    }
                    Ok(())
                }
            }))
            .await;

        assert_eq!(
            controller.wait().await,
            Some(RunOutcome::Succeeded { attempts: 2 })
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_run_without_counting_attempt() {
        let controller = RetryController::new("cancel", fast_config());

        controller
            .run(retry_operation(|| async {
                std::future::pending::<()>().await;
                Ok(())
            }))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.state().await, RetryState::Running);

        let outcome = controller.cancel().await;
        assert_eq!(outcome, Some(RunOutcome::Cancelled { attempts: 0 }));
        assert_eq!(controller.state().await, RetryState::Idle);
        assert_eq!(controller.cancel().await, None);
    }

    #[test_log::test(tokio::test)]
    async fn test_new_run_never_overlaps_previous() {
        let controller = Arc::new(RetryController::new("exclusive", fast_config()));
        let in_flight = Arc::new(AtomicI32::new(0));
        let max_seen = Arc::new(AtomicI32::new(0));

        let make_op = |hold| exclusive_op(&in_flight, &max_seen, hold);

        controller.run(make_op(Duration::from_secs(10))).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(in_flight.load(Ordering::SeqCst), 1);

        // Replacing the run must wait for the first attempt to be torn down
        controller.run(make_op(Duration::from_millis(30))).await;
        assert!(in_flight.load(Ordering::SeqCst) <= 1);

        let outcome = controller.wait().await;
        assert_eq!(outcome, Some(RunOutcome::Succeeded { attempts: 1 }));
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_resets_attempt_counter() {
        let controller = RetryController::new("reset", fast_config().with_max_attempts(2));

        controller
            .run(retry_operation(|| async { Err(anyhow::anyhow!("nope")) }))
            .await;
        assert_eq!(
            controller.wait().await,
            Some(RunOutcome::Exhausted { attempts: 2 })
        );

        controller.run(retry_operation(|| async { Ok(()) })).await;
        assert_eq!(
            controller.wait().await,
            Some(RunOutcome::Succeeded { attempts: 1 })
        );
        assert_eq!(controller.attempts(), 1);
    }

    #[tokio::test]
    async fn test_waiting_does_not_release_the_run() {
        let controller = Arc::new(RetryController::new("wait", fast_config()));
        let in_flight = Arc::new(AtomicI32::new(0));
        let max_seen = Arc::new(AtomicI32::new(0));

        controller
            .run(exclusive_op(&in_flight, &max_seen, Duration::from_millis(300)))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.state().await, RetryState::Running);

        // The waited-on run is still cancelled before the new one starts
        controller
            .run(exclusive_op(&in_flight, &max_seen, Duration::from_millis(30)))
            .await;
        assert_eq!(
            waiter.await.unwrap(),
            Some(RunOutcome::Cancelled { attempts: 0 })
        );

        assert_eq!(
            controller.wait().await,
            Some(RunOutcome::Succeeded { attempts: 1 })
        );
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_and_run_never_overlap() {
        let controller = Arc::new(RetryController::new("cancel-run", fast_config()));
        let in_flight = Arc::new(AtomicI32::new(0));
        let max_seen = Arc::new(AtomicI32::new(0));

        for _ in 0..20 {
            controller
                .run(exclusive_op(&in_flight, &max_seen, Duration::from_secs(10)))
                .await;
            tokio::time::sleep(Duration::from_millis(5)).await;

            let canceller = {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move { controller.cancel().await })
            };
            controller
                .run(exclusive_op(&in_flight, &max_seen, Duration::from_millis(5)))
                .await;
            canceller.await.unwrap();
            controller.cancel().await;
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wait_after_finish_returns_outcome_and_keeps_idle() {
        let controller = RetryController::new("finished", fast_config());
        controller.run(retry_operation(|| async { Ok(()) })).await;

        assert_eq!(
            controller.wait().await,
            Some(RunOutcome::Succeeded { attempts: 1 })
        );
        assert_eq!(controller.state().await, RetryState::Idle);
        // Still reported until replaced or cancelled
        assert_eq!(
            controller.wait().await,
            Some(RunOutcome::Succeeded { attempts: 1 })
        );
        assert_eq!(
            controller.cancel().await,
            Some(RunOutcome::Succeeded { attempts: 1 })
        );
        assert_eq!(controller.wait().await, None);
    }
}

//! Backoff strategies

use std::time::Duration;

/// Smallest retry delay; a zero base would retry in a tight loop
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Sequence of delays between retry attempts
pub trait Backoff: Send + Sync {
    /// Delay to wait before the next attempt
    fn next_duration(&mut self) -> Duration;

    /// Restore the sequence to its initial state
    fn reset(&mut self);
}

/// Doubling backoff capped at a maximum
///
/// The first attempt fires immediately, then delays start at `base` and
/// double up to `max`.
///
/// ```
/// use nodewatch_executor::{Backoff, ExponentialBackoff};
/// use std::time::Duration;
///
/// let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(2));
/// assert_eq!(backoff.next_duration(), Duration::ZERO);
/// assert_eq!(backoff.next_duration(), Duration::from_secs(1));
/// assert_eq!(backoff.next_duration(), Duration::from_secs(2));
/// assert_eq!(backoff.next_duration(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    next: Option<Duration>,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `base` and capped at `max`
    ///
    /// `base` is raised to [`MIN_BACKOFF`] if smaller.
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(MIN_BACKOFF);
        Self {
            base,
            max: max.max(base),
            next: None,
        }
    }

    /// Base delay
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Maximum delay
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Backoff for ExponentialBackoff {
    fn next_duration(&mut self) -> Duration {
        match self.next {
            None => {
                self.next = Some(self.base);
                Duration::ZERO
            }
            Some(current) => {
                let current = current.min(self.max);
                self.next = Some(current.saturating_mul(2).min(self.max));
                current
            }
        }
    }

    fn reset(&mut self) {
        self.next = None;
    }
}

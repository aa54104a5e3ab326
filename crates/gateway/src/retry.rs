// Exponential backoff and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use restops_config::RetrySettings;

/// Sleep granularity while waiting, so cancellation is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            multiplier: settings.multiplier.max(1.0),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }

    /// Retry `max_retries` times without waiting. For tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Single attempt, no retries.
    pub fn never() -> Self {
        Self::immediate(0)
    }

    /// Delay before retry number `retry` (1-based). A server-provided
    /// `retry_after` wins over the computed backoff but is still capped.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(self.max_backoff.max(self.initial_backoff));
        }
        let exp = retry.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.powi(exp);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Cooperative cancellation flag, optionally with a deadline.
///
/// Clones share the flag. Cancellation is observed at waiting points
/// (backoff sleeps and remote polling), never mid-request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that cancels itself once `timeout` has elapsed. A timeout too
    /// large to represent means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Sleep for `duration`. Returns false as soon as the token is cancelled.
    /// An unrepresentable `duration` waits until cancellation.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> bool {
        let end = Instant::now().checked_add(duration);
        loop {
            if self.is_cancelled() {
                return false;
            }
            let slice = match end {
                Some(end) => {
                    let now = Instant::now();
                    if now >= end {
                        return true;
                    }
                    (end - now).min(SLEEP_SLICE)
                }
                None => SLEEP_SLICE,
            };
            thread::sleep(slice);
        }
    }
}

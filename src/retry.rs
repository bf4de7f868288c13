//! Bounded retry primitive shared by every polling point

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded polling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
    /// Upper bound of random extra delay added to each wait
    pub jitter: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub const fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn wait_time(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(extra)
    }
}

/// Call `op` until it yields `Some`, at most `policy.max_attempts` times.
///
/// `op` receives the 1-based attempt number. Returns `None` once the budget is
/// exhausted. No delay follows the final attempt.
pub async fn retry_until<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        if let Some(value) = op(attempt).await {
            return Some(value);
        }
        debug!("{}: attempt {}/{} not ready", what, attempt, attempts);
        if attempt < attempts {
            tokio::time::sleep(policy.wait_time()).await;
        }
    }
    None
}

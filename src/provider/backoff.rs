//! Exponential backoff with jitter.

use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound of every delay.
    pub max_interval: Duration,
    /// Growth factor between consecutive retries, at least 1.
    pub multiplier: f64,
    /// Jitter as a fraction of the nominal delay, in `[0, 1)`.
    pub randomization_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
            multiplier: 1.5,
            randomization_factor: 0.5,
        }
    }
}

/// Retry delay generator owned by one worker.
///
/// Delays grow by `multiplier` per failure and are jittered downwards by up to
/// `randomization_factor`. Consecutive delays never decrease and never exceed
/// `max_interval`. There is no retry limit.
///
/// # Examples
///
/// ```rust
/// use routesync::provider::{BackoffPolicy, ExponentialBackoff};
///
/// let mut backoff = ExponentialBackoff::new(BackoffPolicy::default());
/// let first = backoff.next_delay();
/// let second = backoff.next_delay();
/// assert!(second >= first);
/// ```
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    nominal: Duration,
    last: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a backoff in its initial state.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            nominal: policy.initial_interval,
            last: Duration::ZERO,
            attempts: 0,
            policy,
        }
    }

    /// The parameters.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        let max = self.policy.max_interval;
        let factor = self.policy.randomization_factor.clamp(0.0, 1.0);
        let jitter = 1.0 - fastrand::f64() * factor;

        let delay = self.nominal.mul_f64(jitter).clamp(self.last.min(max), max);

        self.last = delay;
        self.nominal = self
            .nominal
            .mul_f64(self.policy.multiplier.max(1.0))
            .min(max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Return to the initial state after a successful connection.
    pub fn reset(&mut self) {
        self.nominal = self.policy.initial_interval;
        self.last = Duration::ZERO;
        self.attempts = 0;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

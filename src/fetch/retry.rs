//! Retry policies and backoff delay calculation.
//!
//! [`RetryPolicy`] is chosen per call site (single lookups retry less than
//! batched lookups). [`BackoffConfig`] belongs to the
//! [`ResilientFetcher`](super::ResilientFetcher) and turns an attempt
//! number into a sleep duration.

use std::time::Duration;

use rand::Rng;

/// Default overall deadline for one logical upstream call.
const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Retry budget for one logical upstream call.
///
/// ```rust
/// # use thumbproxy::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::new("thumbnail")
///     .max_retries(4)
///     .deadline(Duration::from_secs(10));
/// assert_eq!(policy.max_retries, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Call-site name, attached to logs and metrics.
    pub name: String,
    /// Retries after the first attempt. `n` allows `n + 1` attempts.
    pub max_retries: u32,
    /// Upper bound on the whole call, backoff sleeps included.
    /// `None` leaves only the transport's own per-request timeout.
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    /// Create a policy with 3 retries and a 30s deadline.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_retries: 3,
            deadline: Some(DEFAULT_DEADLINE),
        }
    }

    /// Policy for single-identifier lookups.
    pub fn single() -> Self {
        Self::new("thumbnail")
    }

    /// Policy for batched lookups. Batches cover many identifiers, so a
    /// failed batch costs more than a failed single lookup.
    pub fn batch() -> Self {
        Self::new("thumbnail_batch").max_retries(5)
    }

    /// Single attempt, no retry.
    pub fn disabled(name: impl Into<String>) -> Self {
        Self::new(name).max_retries(0)
    }

    /// Set the number of retries after the first attempt.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the overall deadline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Remove the overall deadline.
    pub fn without_deadline(mut self) -> Self {
        self.deadline = None;
        self
    }
}

/// What kind of failure a retry is recovering from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Network or body-read failure.
    Failure,
    /// Upstream signalled overload.
    RateLimited,
}

/// Exponential backoff with bounded random jitter.
///
/// `delay = base * 2^attempt + random(0..=max_jitter)`, capped at
/// `max_delay`. Rate-limited attempts use the larger
/// `rate_limit_base_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Base delay for network/read failures. Default: 100ms.
    pub base_delay: Duration,
    /// Base delay for rate-limited responses. Default: 200ms.
    pub rate_limit_base_delay: Duration,
    /// Ceiling of the random jitter added to every delay. Default: 200ms.
    pub max_jitter: Duration,
    /// Cap on the final delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            rate_limit_base_delay: Duration::from_millis(200),
            max_jitter: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backoff with no delay at all. Useful in tests.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            rate_limit_base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Set the base delay for network/read failures.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the base delay for rate-limited responses.
    pub fn rate_limit_base_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_base_delay = delay;
        self
    }

    /// Set the jitter ceiling. `Duration::ZERO` disables jitter.
    pub fn max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Set the maximum delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retrying after `attempt` (1-indexed), without jitter.
    pub fn delay_for_attempt(&self, kind: BackoffKind, attempt: u32) -> Duration {
        let base = match kind {
            BackoffKind::Failure => self.base_delay,
            BackoffKind::RateLimited => self.rate_limit_base_delay,
        };
        base.saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Delay before retrying after `attempt`, jitter included.
    pub fn effective_delay(&self, kind: BackoffKind, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        (self.delay_for_attempt(kind, attempt) + jitter).min(self.max_delay)
    }
}

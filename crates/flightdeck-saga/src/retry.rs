use std::time::Duration;

use rand::Rng;

/// How a step reacts to a retryable failure.
///
/// Exactly one policy is attached to every step. A retryable failure is
/// reattempted for as long as [`RetryPolicy::next_delay`] yields a delay; after
/// that it is escalated to a fatal failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum RetryPolicy {
    /// Never retry.
    #[default]
    None,
    /// Retry up to `max_count` times, waiting `interval` before each retry.
    FixedInterval { interval: Duration, max_count: u32 },
    /// Double the delay on every retry, starting at `initial_interval` and
    /// capped at `max_interval`; give up once the next retry would start after
    /// `max_operation_time` has passed since the first attempt.
    ExponentialBackoff {
        initial_interval: Duration,
        max_interval: Duration,
        max_operation_time: Duration,
    },
    /// Retry up to `max_count` times after a random delay in
    /// `[0, operation_increment * max_concurrency]`, spreading out retries of
    /// many flights contending for the same resource.
    RandomBackoff {
        operation_increment: Duration,
        max_concurrency: u32,
        max_count: u32,
    },
}

impl RetryPolicy {
    #[must_use]
    pub const fn none() -> Self {
        Self::None
    }

    #[must_use]
    pub const fn fixed_interval(interval: Duration, max_count: u32) -> Self {
        Self::FixedInterval {
            interval,
            max_count,
        }
    }

    #[must_use]
    pub const fn exponential_backoff(
        initial_interval: Duration,
        max_interval: Duration,
        max_operation_time: Duration,
    ) -> Self {
        Self::ExponentialBackoff {
            initial_interval,
            max_interval,
            max_operation_time,
        }
    }

    #[must_use]
    pub const fn random_backoff(
        operation_increment: Duration,
        max_concurrency: u32,
        max_count: u32,
    ) -> Self {
        Self::RandomBackoff {
            operation_increment,
            max_concurrency,
            max_count,
        }
    }

    /// Delay before the next attempt, or `None` when retries are exhausted.
    ///
    /// `retries` is the number of retries already performed and `elapsed` the
    /// time since the first attempt started.
    #[must_use]
    pub fn next_delay(&self, retries: u32, elapsed: Duration) -> Option<Duration> {
        match *self {
            Self::None => None,
            Self::FixedInterval {
                interval,
                max_count,
            } => (retries < max_count).then_some(interval),
            Self::ExponentialBackoff {
                initial_interval,
                max_interval,
                max_operation_time,
            } => {
                let factor = 2_u32.saturating_pow(retries);
                let delay = initial_interval.saturating_mul(factor).min(max_interval);
                (elapsed.saturating_add(delay) <= max_operation_time).then_some(delay)
            }
            Self::RandomBackoff {
                operation_increment,
                max_concurrency,
                max_count,
            } => {
                if retries >= max_count {
                    return None;
                }
                let ceiling = operation_increment.saturating_mul(max_concurrency);
                let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
                Some(Duration::from_millis(rand::rng().random_range(0..=millis)))
            }
        }
    }

    #[must_use]
    pub fn retries(&self) -> bool {
        !matches!(self, Self::None)
    }
}

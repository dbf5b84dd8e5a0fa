//! Retry configuration.

use crate::error::Retryable;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Observation hook invoked before each retry with the failed attempt number.
pub type OnRetry = Arc<dyn Fn(u32, &dyn Retryable) + Send + Sync>;

/// Predicate deciding whether an error is retryable.
pub type RetryPredicate = Arc<dyn Fn(&dyn Retryable) -> bool + Send + Sync>;

/// Configuration for retry behavior.
#[derive(Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Wait strategy.
    pub wait: WaitStrategy,
    /// Retry condition.
    pub retry_on: RetryCondition,
    /// Hook called once per retry, before sleeping.
    pub on_retry: Option<OnRetry>,
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("wait", &self.wait)
            .field("retry_on", &self.retry_on)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait: WaitStrategy::ExponentialBackoff {
                initial: Duration::from_millis(1000),
                max: Duration::from_secs(30),
                multiplier: 2.0,
            },
            retry_on: RetryCondition::default(),
            on_retry: None,
        }
    }
}

impl RetryConfig {
    /// Create a new default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total number of attempts (minimum 1).
    #[must_use]
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set the number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_attempts = n.saturating_add(1);
        self
    }

    /// Number of retries after the first attempt.
    pub fn retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Set the wait strategy.
    #[must_use]
    pub fn wait(mut self, strategy: WaitStrategy) -> Self {
        self.wait = strategy;
        self
    }

    /// Use exponential backoff with a multiplier of 2.
    #[must_use]
    pub fn exponential(self, initial: Duration, max: Duration) -> Self {
        self.backoff(initial, max, 2.0)
    }

    /// Use exponential backoff with an explicit multiplier.
    #[must_use]
    pub fn backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.wait = WaitStrategy::ExponentialBackoff {
            initial,
            max,
            multiplier,
        };
        self
    }

    /// Use exponential backoff with jitter.
    ///
    /// Delays become non-deterministic; tests that assert on timing should
    /// use [`RetryConfig::backoff`] instead.
    #[must_use]
    pub fn exponential_jitter(mut self, initial: Duration, max: Duration, jitter: f64) -> Self {
        self.wait = WaitStrategy::ExponentialJitter {
            initial,
            max,
            multiplier: 2.0,
            jitter,
        };
        self
    }

    /// Use fixed delay.
    #[must_use]
    pub fn fixed(mut self, delay: Duration) -> Self {
        self.wait = WaitStrategy::Fixed(delay);
        self
    }

    /// Honour the server's Retry-After header, falling back to the current
    /// strategy when it is absent.
    #[must_use]
    pub fn respect_retry_after(mut self, max_wait: Duration) -> Self {
        self.wait = WaitStrategy::RetryAfter {
            fallback: Box::new(self.wait),
            max_wait,
        };
        self
    }

    /// Set retry condition.
    #[must_use]
    pub fn retry_on(mut self, condition: RetryCondition) -> Self {
        self.retry_on = condition;
        self
    }

    /// Set the retry observation hook.
    #[must_use]
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &dyn Retryable) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Config for API calls: 3 attempts, 1s doubling up to 30s.
    pub fn for_api() -> Self {
        Self::new()
            .max_attempts(3)
            .exponential(Duration::from_millis(1000), Duration::from_secs(30))
    }

    /// Config that never retries.
    pub fn no_retry() -> Self {
        Self::new().max_attempts(1)
    }
}

/// Strategy for waiting between retries.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// No waiting.
    None,
    /// Fixed delay.
    Fixed(Duration),
    /// Exponential backoff.
    ExponentialBackoff {
        /// Initial delay.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
        /// Multiplier for each attempt.
        multiplier: f64,
    },
    /// Exponential backoff with jitter.
    ExponentialJitter {
        /// Initial delay.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
        /// Multiplier for each attempt.
        multiplier: f64,
        /// Jitter factor (0.0 to 1.0).
        jitter: f64,
    },
    /// Linear backoff.
    Linear {
        /// Initial delay.
        initial: Duration,
        /// Increment per attempt.
        increment: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Respect Retry-After header.
    RetryAfter {
        /// Fallback if no header.
        fallback: Box<WaitStrategy>,
        /// Maximum wait time.
        max_wait: Duration,
    },
}

impl WaitStrategy {
    /// Calculate the wait after the given failed attempt (1-indexed).
    ///
    /// For exponential backoff the wait before attempt `k` is
    /// `min(max, initial * multiplier^(k-2))`.
    pub fn calculate(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        match self {
            WaitStrategy::None => Duration::ZERO,
            WaitStrategy::Fixed(d) => *d,
            WaitStrategy::ExponentialBackoff {
                initial,
                max,
                multiplier,
            } => {
                let delay = initial.as_secs_f64() * multiplier.powi(exponent);
                Duration::from_secs_f64(delay.min(max.as_secs_f64()).max(0.0))
            }
            WaitStrategy::ExponentialJitter {
                initial,
                max,
                multiplier,
                jitter,
            } => {
                let base = initial.as_secs_f64() * multiplier.powi(exponent);
                let jitter_amount = base * jitter * random_jitter();
                let delay = (base + jitter_amount).min(max.as_secs_f64());
                Duration::from_secs_f64(delay.max(0.0))
            }
            WaitStrategy::Linear {
                initial,
                increment,
                max,
            } => {
                let delay = *initial + *increment * attempt.saturating_sub(1);
                delay.min(*max)
            }
            WaitStrategy::RetryAfter { fallback, max_wait } => retry_after
                .map(|d| d.min(*max_wait))
                .unwrap_or_else(|| fallback.calculate(attempt, None)),
        }
    }
}

/// Condition for retrying.
#[derive(Clone, Default)]
pub struct RetryCondition {
    /// Extra HTTP status codes to retry on.
    pub on_status_codes: Vec<u16>,
    /// Custom predicate replacing the default classification.
    pub custom: Option<RetryPredicate>,
}

impl fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCondition")
            .field("on_status_codes", &self.on_status_codes)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl RetryCondition {
    /// Create a new empty condition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add status codes to retry on.
    #[must_use]
    pub fn on_status(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.on_status_codes.extend(codes);
        self
    }

    /// Set a custom predicate.
    #[must_use]
    pub fn with_custom<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn Retryable) -> bool + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(predicate));
        self
    }

    /// Check if an error should be retried.
    pub fn should_retry(&self, error: &dyn Retryable) -> bool {
        if let Some(predicate) = &self.custom {
            return predicate(error);
        }

        if let Some(status) = error.status() {
            if self.on_status_codes.contains(&status) {
                return true;
            }
        }

        error.is_retryable()
    }
}

/// Generate a random jitter factor between -1.0 and 1.0.
fn random_jitter() -> f64 {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    rng.gen_range(-1.0..1.0)
}

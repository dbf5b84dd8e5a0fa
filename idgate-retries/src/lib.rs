//! # idgate-retries
//!
//! Retry strategies for idgate.
//!
//! Transient backend failures (no response, 5xx, 429) are retried with a
//! configurable wait between attempts; everything else is returned to the
//! caller on the first failure.
//!
//! ## Core Concepts
//!
//! - **[`RetryConfig`]**: attempts, wait strategy, retry condition, hook
//! - **[`WaitStrategy`]**: how long to wait between attempts
//! - **[`RetryCondition`]**: which errors are retryable
//! - **[`Retryable`]**: how an error type reports its retryability
//! - **[`with_retry`]**: execute an async operation with retries
//!
//! ## Wait Strategies
//!
//! - [`WaitStrategy::ExponentialBackoff`]: `min(max, initial * multiplier^(k-2))`
//!   before attempt `k`; the default, and deterministic
//! - [`WaitStrategy::ExponentialJitter`]: exponential with randomization
//! - [`WaitStrategy::Fixed`] and [`WaitStrategy::Linear`]
//! - [`WaitStrategy::RetryAfter`]: respect the server's Retry-After header
//!
//! ## Example
//!
//! ```ignore
//! use idgate_retries::{with_retry, RetryConfig};
//! use std::time::Duration;
//!
//! let config = RetryConfig::new()
//!     .max_attempts(3)
//!     .exponential(Duration::from_secs(1), Duration::from_secs(30))
//!     .on_retry(|attempt, error| tracing::info!(attempt, %error, "retrying"));
//!
//! let page = with_retry(&config, || client.list_applications()).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod executor;

pub use config::{OnRetry, RetryCondition, RetryConfig, RetryPredicate, WaitStrategy};
pub use error::Retryable;
pub use executor::{with_retry, with_retry_state, AttemptInfo, RetryState};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{with_retry, RetryCondition, RetryConfig, Retryable, WaitStrategy};
}

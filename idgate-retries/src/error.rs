//! Classification of errors for retrying.

use idgate_core::ApiError;
use std::fmt;
use std::time::Duration;

/// Errors the retry executor can reason about.
pub trait Retryable: fmt::Display {
    /// Whether the failure is transient and worth another attempt.
    fn is_retryable(&self) -> bool;

    /// HTTP status, if the failure came from a response.
    fn status(&self) -> Option<u16> {
        None
    }

    /// Server-suggested wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for ApiError {
    /// Network failures, 5xx and 429 are retryable; every other 4xx is not.
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    fn status(&self) -> Option<u16> {
        ApiError::status(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        ApiError::retry_after(self)
    }
}

//! Retry executor for running operations with retries.

use crate::config::RetryConfig;
use crate::error::Retryable;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// State of a retry run.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Current attempt number (1-indexed).
    pub attempt: u32,
    /// Last error message.
    pub last_error: Option<String>,
    /// Total time spent waiting.
    pub total_wait_time: Duration,
    /// History of attempts.
    pub history: Vec<AttemptInfo>,
}

/// Information about a single attempt.
#[derive(Debug, Clone)]
pub struct AttemptInfo {
    /// Attempt number.
    pub attempt: u32,
    /// Whether it succeeded.
    pub success: bool,
    /// Error message if failed.
    pub error: Option<String>,
    /// Time waited after this attempt before the next one.
    pub wait_time: Duration,
}

/// Execute an operation with retries.
///
/// The operation runs up to `config.max_attempts` times. A failure the
/// config's [`RetryCondition`](crate::RetryCondition) rejects is returned
/// immediately, as is the failure of the last attempt.
///
/// # Example
///
/// ```ignore
/// use idgate_retries::{with_retry, RetryConfig};
///
/// let config = RetryConfig::for_api();
/// let identities = with_retry(&config, || client.fetch_identities()).await?;
/// ```
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    with_retry_state(config, operation).await.0
}

/// Execute with retries and get state information.
pub async fn with_retry_state<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> (Result<T, E>, RetryState)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut state = RetryState::default();
    let max_attempts = config.max_attempts.max(1);

    loop {
        state.attempt += 1;

        debug!(
            attempt = state.attempt,
            max_attempts, "Executing retry attempt"
        );

        match operation().await {
            Ok(result) => {
                state.history.push(AttemptInfo {
                    attempt: state.attempt,
                    success: true,
                    error: None,
                    wait_time: Duration::ZERO,
                });
                return (Ok(result), state);
            }
            Err(error) => {
                let retryable = config.retry_on.should_retry(&error);
                state.last_error = Some(error.to_string());

                if !retryable || state.attempt >= max_attempts {
                    if retryable {
                        warn!(
                            attempt = state.attempt,
                            error = %error,
                            "Retries exhausted"
                        );
                    } else {
                        debug!(
                            attempt = state.attempt,
                            error = %error,
                            "Error not retryable"
                        );
                    }
                    state.history.push(AttemptInfo {
                        attempt: state.attempt,
                        success: false,
                        error: state.last_error.clone(),
                        wait_time: Duration::ZERO,
                    });
                    return (Err(error), state);
                }

                let wait = config.wait.calculate(state.attempt, error.retry_after());
                state.total_wait_time += wait;
                state.history.push(AttemptInfo {
                    attempt: state.attempt,
                    success: false,
                    error: state.last_error.clone(),
                    wait_time: wait,
                });

                if let Some(hook) = &config.on_retry {
                    hook(state.attempt, &error);
                }

                debug!(
                    attempt = state.attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %error,
                    "Waiting before retry"
                );

                sleep(wait).await;
            }
        }
    }
}

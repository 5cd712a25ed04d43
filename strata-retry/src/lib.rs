//! Bounded retry and backoff logic for Strata job execution
//!
//! The job dispatcher wraps every job attempt in [`with_policy`]. Only errors the
//! caller classifies as transient are retried; permanent errors end the loop at once.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Common retry error types
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Operation '{operation}' exceeded {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        operation: String,
        attempts: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Transient error in '{operation}': {source}")]
    Transient {
        operation: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Permanent error in '{operation}': {source}")]
    Permanent {
        operation: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RetryError {
    /// Name of the operation that produced this error
    pub fn operation(&self) -> &str {
        match self {
            RetryError::MaxRetriesExceeded { operation, .. }
            | RetryError::Transient { operation, .. }
            | RetryError::Permanent { operation, .. } => operation,
        }
    }

    /// The underlying error reported by the last attempt
    pub fn source_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        match self {
            RetryError::MaxRetriesExceeded { source, .. }
            | RetryError::Transient { source, .. }
            | RetryError::Permanent { source, .. } => source.as_ref(),
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T> = std::result::Result<T, RetryError>;

/// Boxed future for retry operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = RetryResult<T>> + Send + 'a>>;

/// Attempt limit plus the backoff schedule between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: ExponentialBackoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: ExponentialBackoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Policy with the default schedule and the given attempt limit
    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self::new(max_attempts, default_backoff_policy())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_max_attempts(3)
    }
}

/// Execute an operation with the default retry policy
pub async fn with_backoff<F, T>(op_name: &str, f: F) -> RetryResult<T>
where
    F: FnMut(usize) -> BoxFuture<'static, T>,
{
    with_policy(op_name, RetryPolicy::default(), f).await
}

/// Execute an operation, retrying transient failures according to `policy`.
///
/// The closure receives the 1-based attempt number.
pub async fn with_policy<F, T>(op_name: &str, policy: RetryPolicy, mut f: F) -> RetryResult<T>
where
    F: FnMut(usize) -> BoxFuture<'static, T>,
{
    let RetryPolicy {
        max_attempts,
        mut backoff,
    } = policy;
    backoff.reset();
    let mut attempt = 1;

    loop {
        debug!(operation = op_name, attempt, "Attempting operation");

        match f(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = op_name, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err @ RetryError::Permanent { .. }) => {
                warn!(operation = op_name, attempt, error = %err, "Operation failed permanently");
                return Err(err);
            }
            Err(err @ RetryError::MaxRetriesExceeded { .. }) => return Err(err),
            Err(RetryError::Transient { source, .. }) => {
                warn!(operation = op_name, attempt, error = %source, "Operation failed");

                let delay = match backoff.next_backoff() {
                    Some(delay) if attempt < max_attempts => delay,
                    _ => {
                        return Err(RetryError::MaxRetriesExceeded {
                            operation: op_name.to_string(),
                            attempts: attempt,
                            source,
                        });
                    }
                };

                attempt += 1;

                #[cfg(feature = "async-rt")]
                tokio::time::sleep(delay).await;

                #[cfg(not(feature = "async-rt"))]
                std::thread::sleep(delay);
            }
        }
    }
}

/// Default backoff policy for general operations
pub fn default_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_max_interval(Duration::from_secs(5))
        .with_max_elapsed_time(Some(Duration::from_secs(30)))
        .with_multiplier(2.0)
        .build()
}

/// Backoff policy for payload moves between storage tiers
pub fn tier_transfer_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_max_interval(Duration::from_secs(10))
        .with_max_elapsed_time(Some(Duration::from_secs(120)))
        .with_multiplier(1.5)
        .build()
}

/// Near-immediate retries, for tests and in-memory tiers
pub fn immediate_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(1))
        .with_max_interval(Duration::from_millis(5))
        .with_max_elapsed_time(None)
        .with_multiplier(1.0)
        .build()
}

/// Trait for categorizing errors as transient or permanent
#[async_trait]
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Wrap an error as transient or permanent according to its [`RetryableError`] classification
pub fn classify<E>(op_name: &str, err: E) -> RetryError
where
    E: RetryableError + std::error::Error + Send + Sync + 'static,
{
    if err.is_transient() {
        RetryError::Transient {
            operation: op_name.to_string(),
            source: Box::new(err),
        }
    } else {
        RetryError::Permanent {
            operation: op_name.to_string(),
            source: Box::new(err),
        }
    }
}

/// Helper macro for creating transient errors
#[macro_export]
macro_rules! transient_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Transient {
            operation: ($op).to_string(),
            source: Box::new($err),
        }
    };
}

/// Helper macro for creating permanent errors
#[macro_export]
macro_rules! permanent_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Permanent {
            operation: ($op).to_string(),
            source: Box::new($err),
        }
    };
}

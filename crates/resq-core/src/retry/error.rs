//! Error types for request execution.

use std::time::Duration;

use crate::key::OperationKey;

use super::policy::ClassifiedError;

/// Raw failure returned by a single attempt of an operation.
///
/// Kept close to the transport so the classifier can look at curl codes and
/// HTTP statuses before anything is flattened into a message.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// libcurl reported an error (timeout, connection, DNS, ...).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// The server answered with a non-2xx status.
    #[error("HTTP {status}")]
    Http { status: u16, body: Option<String> },
    /// The caller-supplied per-attempt timeout elapsed.
    #[error("attempt timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Anything else a transport wants to report, as text.
    #[error("{0}")]
    Transport(String),
}

impl RequestError {
    pub fn http(status: u16) -> Self {
        RequestError::Http { status, body: None }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        RequestError::Transport(msg.into())
    }
}

/// Typed failure surfaced by the executor. Never swallowed.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The breaker for this key is open; nothing was attempted.
    #[error("circuit open for {key}, retry after {}ms", .retry_after.as_millis())]
    CircuitOpen {
        key: OperationKey,
        retry_after: Duration,
    },
    /// Terminal failure: a non-retryable class, or retries exhausted.
    #[error("{key} failed after {attempts} attempt(s) ({class}): {source}")]
    Failed {
        key: OperationKey,
        class: ClassifiedError,
        attempts: u32,
        source: RequestError,
    },
    /// The caller cancelled the run before an attempt completed.
    #[error("{key} cancelled")]
    Cancelled { key: OperationKey },
}

impl ExecError {
    pub fn key(&self) -> &OperationKey {
        match self {
            ExecError::CircuitOpen { key, .. }
            | ExecError::Failed { key, .. }
            | ExecError::Cancelled { key } => key,
        }
    }

    /// Classified failure, if an attempt was actually made.
    pub fn class(&self) -> Option<ClassifiedError> {
        match self {
            ExecError::Failed { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Whether a durable caller may park this failure in the offline queue.
    ///
    /// Open circuits and exhausted retry-eligible failures qualify; terminal
    /// classes (validation, permission, other 4xx) would fail again on replay.
    pub fn is_deferrable(&self) -> bool {
        match self {
            ExecError::CircuitOpen { .. } => true,
            ExecError::Failed { class, .. } => class.is_retryable(),
            ExecError::Cancelled { .. } => false,
        }
    }
}

/// Invalid retry policy parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("initial delay must be greater than zero")]
    ZeroInitialDelay,
    #[error("max delay {max:?} is below initial delay {initial:?}")]
    MaxBelowInitial { initial: Duration, max: Duration },
    #[error("backoff multiplier must be greater than 1 (got {0})")]
    MultiplierTooSmall(f64),
    #[error("jitter ratio must be within [0, 0.3] (got {0})")]
    JitterOutOfRange(f64),
}

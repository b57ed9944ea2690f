//! Retry and backoff.
//!
//! This module encapsulates failure classification (timeouts, connectivity,
//! server and client errors) and exponential backoff decisions, and the
//! executor that runs an operation under both plus the circuit breaker.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status, classify_message};
pub use error::{ExecError, PolicyError, RequestError};
pub use policy::{ClassifiedError, RetryDecision, RetryPolicy, MAX_JITTER_RATIO};
pub use run::RetryExecutor;

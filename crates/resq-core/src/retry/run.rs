//! Retry loop: gate on the breaker, attempt, classify, back off, repeat.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::breaker::{Admission, CircuitBreaker};
use crate::events::{EventSink, NullSink, ResilienceEvent};
use crate::key::OperationKey;

use super::classify;
use super::error::{ExecError, RequestError};
use super::policy::{RetryDecision, RetryPolicy};

/// Runs caller-supplied operations under a retry policy and a shared breaker.
///
/// Cloning is cheap; clones share the breaker. Concurrent runs with the same
/// key share circuit state but keep their own attempt counters.
#[derive(Clone)]
pub struct RetryExecutor {
    breaker: Arc<CircuitBreaker>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("breaker", &self.breaker)
            .finish()
    }
}

/// Where a cancellable attempt or sleep ended.
enum Step<T> {
    Done(T),
    Cancelled,
}

impl RetryExecutor {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self::with_sink(breaker, Arc::new(NullSink))
    }

    pub fn with_sink(breaker: Arc<CircuitBreaker>, sink: Arc<dyn EventSink>) -> Self {
        Self { breaker, sink }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `operation` until it succeeds or the policy says stop.
    ///
    /// Dropping the returned future cancels the run; an attempt that never
    /// completed is not recorded on the breaker.
    pub async fn run<T, F, Fut>(
        &self,
        key: &OperationKey,
        policy: &RetryPolicy,
        operation: F,
    ) -> Result<T, ExecError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        self.run_inner(key, policy, None, operation).await
    }

    /// Like [`run`](Self::run), but stops with [`ExecError::Cancelled`] as soon
    /// as `cancel` fires, whether mid-attempt or mid-backoff.
    pub async fn run_cancellable<T, F, Fut>(
        &self,
        key: &OperationKey,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, ExecError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        self.run_inner(key, policy, Some(cancel), operation).await
    }

    async fn run_inner<T, F, Fut>(
        &self,
        key: &OperationKey,
        policy: &RetryPolicy,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> Result<T, ExecError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let mut attempt = 1u32;
        let mut last_delay = Duration::ZERO;
        loop {
            if let Admission::Rejected { retry_after } = self.breaker.check(key) {
                tracing::debug!(key = %key, attempt, retry_after_ms = retry_after.as_millis() as u64, "circuit open; failing fast");
                return Err(ExecError::CircuitOpen {
                    key: key.clone(),
                    retry_after,
                });
            }

            let result = match cancellable(cancel, attempt_once(policy, &mut operation)).await {
                Step::Done(r) => r,
                Step::Cancelled => {
                    tracing::debug!(key = %key, attempt, "run cancelled during attempt");
                    return Err(ExecError::Cancelled { key: key.clone() });
                }
            };

            let err = match result {
                Ok(value) => {
                    self.breaker.record_success(key);
                    if attempt > 1 {
                        tracing::debug!(key = %key, attempts = attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let class = classify::classify(&err);
            self.breaker.record_failure(key);

            let delay = match policy.decide(attempt, class) {
                // Jitter is drawn per attempt; the sequence still never shrinks.
                RetryDecision::RetryAfter(d) => d.max(last_delay),
                RetryDecision::NoRetry => {
                    tracing::warn!(key = %key, attempts = attempt, class = %class, error = %err, "operation failed terminally");
                    return Err(ExecError::Failed {
                        key: key.clone(),
                        class,
                        attempts: attempt,
                        source: err,
                    });
                }
            };

            tracing::debug!(key = %key, attempt, delay_ms = delay.as_millis() as u64, class = %class, error = %err, "retrying after failure");
            self.sink.emit(ResilienceEvent::RetryAttempted {
                key: key.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            });

            if let Step::Cancelled = cancellable(cancel, tokio::time::sleep(delay)).await {
                tracing::debug!(key = %key, attempt, "run cancelled during backoff");
                return Err(ExecError::Cancelled { key: key.clone() });
            }
            last_delay = delay;
            attempt += 1;
        }
    }
}

/// One attempt, bounded by the policy's per-attempt timeout when set.
async fn attempt_once<T, F, Fut>(policy: &RetryPolicy, operation: &mut F) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    match policy.attempt_timeout {
        Some(limit) => match tokio::time::timeout(limit, operation()).await {
            Ok(r) => r,
            Err(_) => Err(RequestError::TimedOut(limit)),
        },
        None => operation().await,
    }
}

async fn cancellable<T>(cancel: Option<&CancellationToken>, fut: impl Future<Output = T>) -> Step<T> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Step::Cancelled,
            v = fut => Step::Done(v),
        },
        None => Step::Done(fut.await),
    }
}

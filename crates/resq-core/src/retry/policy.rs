use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::PolicyError;

/// Upper bound on the jitter added to a backoff delay, as a fraction of it.
pub const MAX_JITTER_RATIO: f64 = 0.3;

/// Failure taxonomy shared by the executor, the breaker and the queue.
///
/// Callers map transport errors and HTTP status codes into these kinds via
/// [`classify`](super::classify). Only network, timeout, server and
/// unclassified failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum ClassifiedError {
    /// Connection refused/reset, DNS failure, no route.
    Network,
    /// Connect/read timeout, or a per-attempt timeout imposed by the caller.
    Timeout,
    /// 5xx, or 429 (server asked us to slow down).
    ServerError(u16),
    /// Any other 4xx.
    ClientError(u16),
    /// 400 / 422: the request itself is wrong and will never succeed.
    Validation,
    /// 401 / 403.
    Permission,
    /// Nothing matched. Retried, but logged so the taxonomy can be extended.
    Unknown,
}

impl ClassifiedError {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ClassifiedError::Network
                | ClassifiedError::Timeout
                | ClassifiedError::ServerError(_)
                | ClassifiedError::Unknown
        )
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifiedError::Network => f.write_str("network"),
            ClassifiedError::Timeout => f.write_str("timeout"),
            ClassifiedError::ServerError(code) => write!(f, "server error {code}"),
            ClassifiedError::ClientError(code) => write!(f, "client error {code}"),
            ClassifiedError::Validation => f.write_str("validation"),
            ClassifiedError::Permission => f.write_str("permission"),
            ClassifiedError::Unknown => f.write_str("unknown"),
        }
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with a cap and bounded jitter.
///
/// Serialized with durations in milliseconds so a queued operation can carry
/// the policy it must be replayed with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound on the base delay (before jitter).
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Jitter drawn from `[0, delay * jitter_ratio]`; clamped to [`MAX_JITTER_RATIO`].
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// Optional per-attempt timeout; an elapsed attempt counts as a `Timeout`.
    #[serde(
        rename = "attempt_timeout_ms",
        default,
        with = "opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub attempt_timeout: Option<Duration>,
}

fn default_jitter_ratio() -> f64 {
    MAX_JITTER_RATIO
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_ratio: MAX_JITTER_RATIO,
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Build a validated policy with default jitter and no attempt timeout.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, PolicyError> {
        let policy = Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            ..Self::default()
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Same policy without jitter (deterministic delays).
    pub fn without_jitter(mut self) -> Self {
        self.jitter_ratio = 0.0;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        if self.initial_delay.is_zero() {
            return Err(PolicyError::ZeroInitialDelay);
        }
        if self.max_delay < self.initial_delay {
            return Err(PolicyError::MaxBelowInitial {
                initial: self.initial_delay,
                max: self.max_delay,
            });
        }
        if !(self.backoff_multiplier > 1.0) {
            return Err(PolicyError::MultiplierTooSmall(self.backoff_multiplier));
        }
        if !(0.0..=MAX_JITTER_RATIO).contains(&self.jitter_ratio) {
            return Err(PolicyError::JitterOutOfRange(self.jitter_ratio));
        }
        Ok(())
    }

    /// Base delay after the given failed attempt (1-based), before jitter:
    /// `min(initial * multiplier^(attempt-1), max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        // Cap the exponent; past this the cap has long been reached.
        let exp = attempt.saturating_sub(1).min(64) as i32;
        let raw = initial_ms * self.backoff_multiplier.max(1.0).powi(exp);
        Duration::from_millis(raw.min(max_ms) as u64)
    }

    /// Base delay plus jitter in `[0, base * jitter_ratio]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let ratio = self.jitter_ratio.clamp(0.0, MAX_JITTER_RATIO);
        let jitter_max = base.as_millis() as f64 * ratio;
        if jitter_max <= 0.0 {
            return base;
        }
        let jitter = rand::rng().random_range(0.0..=jitter_max);
        base + Duration::from_millis(jitter as u64)
    }

    /// Decide whether to retry after `attempt` (1-based) failed with `kind`.
    pub fn decide(&self, attempt: u32, kind: ClassifiedError) -> RetryDecision {
        if attempt >= self.max_attempts || !kind.is_retryable() {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.delay_for_attempt(attempt))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

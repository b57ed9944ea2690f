//! Circuit state per key and the transitions between closed, open and probing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::events::{EventSink, NullSink, ResilienceEvent};
use crate::key::OperationKey;

/// Thresholds shared by every key of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures within one window that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls; also the rolling window length.
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
        }
    }
}

/// Result of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Circuit is open; try again after the hint.
    Rejected { retry_after: Duration },
}

#[derive(Debug, Clone)]
struct CircuitState {
    failure_count: u32,
    window_start: Instant,
    is_open: bool,
    /// Set when the cool-down expired and a call was let through. Cleared by
    /// the next recorded outcome; other calls are not held back meanwhile.
    probing: bool,
}

impl CircuitState {
    fn new(now: Instant) -> Self {
        Self {
            failure_count: 0,
            window_start: now,
            is_open: false,
            probing: false,
        }
    }
}

/// Public-facing circuit state for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateKind {
    Closed,
    Open,
    /// Closed after a cool-down, with no outcome recorded yet. Calls are
    /// admitted; the next failure re-opens the circuit at once.
    HalfOpen,
}

/// Snapshot of one circuit for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub key: OperationKey,
    pub state: CircuitStateKind,
    pub failure_count: u32,
    pub failure_threshold: u32,
    /// Remaining cool-down while open.
    pub retry_after_ms: Option<u64>,
}

/// Keyed circuit breaker. Cheap to share behind an `Arc`.
///
/// The map lock is only held for the duration of a state transition, never
/// across an await point, so concurrent callers sharing a key serialize their
/// counter updates without blocking unrelated work.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<OperationKey, CircuitState>>,
    config: BreakerConfig,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("circuits", &self.circuits().len())
            .finish()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_sink(config, Arc::new(NullSink))
    }

    /// Breaker that reports `CircuitOpened` to the given sink.
    pub fn with_sink(config: BreakerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                cool_down: config.cool_down,
            },
            sink,
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    fn circuits(&self) -> MutexGuard<'_, HashMap<OperationKey, CircuitState>> {
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask whether a call under `key` may proceed.
    ///
    /// An open circuit whose cool-down has elapsed is closed here and the call
    /// is admitted as a probe. Calls arriving before the probe finishes are
    /// admitted too; whichever outcome is recorded first settles the circuit.
    pub fn check(&self, key: &OperationKey) -> Admission {
        let now = Instant::now();
        let mut circuits = self.circuits();
        let Some(state) = circuits.get_mut(key) else {
            return Admission::Allowed;
        };
        if !state.is_open {
            return Admission::Allowed;
        }
        let elapsed = now.saturating_duration_since(state.window_start);
        if elapsed > self.config.cool_down {
            state.is_open = false;
            state.probing = true;
            tracing::info!(key = %key, "cool-down elapsed; admitting probe call");
            Admission::Allowed
        } else {
            Admission::Rejected {
                retry_after: self.config.cool_down - elapsed,
            }
        }
    }

    /// Record a successful call: the failure counter is cleared.
    pub fn record_success(&self, key: &OperationKey) {
        let mut circuits = self.circuits();
        if let Some(state) = circuits.get_mut(key) {
            if state.probing {
                tracing::info!(key = %key, "probe succeeded; circuit closed");
            }
            state.failure_count = 0;
            state.is_open = false;
            state.probing = false;
        }
    }

    /// Record a failed call. Returns true when this failure opened the circuit.
    pub fn record_failure(&self, key: &OperationKey) -> bool {
        let now = Instant::now();
        let threshold = self.config.failure_threshold;
        let opened = {
            let mut circuits = self.circuits();
            let state = circuits
                .entry(key.clone())
                .or_insert_with(|| CircuitState::new(now));

            if state.probing {
                state.probing = false;
                state.is_open = true;
                state.window_start = now;
                state.failure_count = state.failure_count.saturating_add(1).max(threshold);
                tracing::warn!(key = %key, "probe failed; circuit re-opened");
                true
            } else if state.is_open {
                // Late failure from a call admitted before the circuit opened.
                state.failure_count = state.failure_count.saturating_add(1);
                false
            } else {
                if state.failure_count > 0
                    && now.saturating_duration_since(state.window_start) > self.config.cool_down
                {
                    // Stale window: restart it, counting this failure.
                    state.failure_count = 1;
                    state.window_start = now;
                } else {
                    if state.failure_count == 0 {
                        state.window_start = now;
                    }
                    state.failure_count = state.failure_count.saturating_add(1);
                }
                if state.failure_count >= threshold {
                    state.is_open = true;
                    state.window_start = now;
                    tracing::warn!(
                        key = %key,
                        failures = state.failure_count,
                        threshold,
                        "circuit opened after repeated failures"
                    );
                    true
                } else {
                    false
                }
            }
        };
        if opened {
            self.sink.emit(ResilienceEvent::CircuitOpened { key: key.clone() });
        }
        opened
    }

    /// Forget all state for `key` (operator override).
    pub fn reset(&self, key: &OperationKey) {
        self.circuits().remove(key);
    }

    /// Status of one circuit. Unknown keys report as closed with no failures.
    pub fn status(&self, key: &OperationKey) -> CircuitStatus {
        let now = Instant::now();
        let circuits = self.circuits();
        match circuits.get(key) {
            Some(state) => self.status_of(key, state, now),
            None => CircuitStatus {
                key: key.clone(),
                state: CircuitStateKind::Closed,
                failure_count: 0,
                failure_threshold: self.config.failure_threshold,
                retry_after_ms: None,
            },
        }
    }

    /// Status of every tracked circuit, sorted by key.
    pub fn snapshots(&self) -> Vec<CircuitStatus> {
        let now = Instant::now();
        let circuits = self.circuits();
        let mut out: Vec<CircuitStatus> = circuits
            .iter()
            .map(|(k, s)| self.status_of(k, s, now))
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    fn status_of(&self, key: &OperationKey, state: &CircuitState, now: Instant) -> CircuitStatus {
        let (kind, retry_after_ms) = if state.is_open {
            let elapsed = now.saturating_duration_since(state.window_start);
            let remaining = self.config.cool_down.saturating_sub(elapsed);
            (CircuitStateKind::Open, Some(remaining.as_millis() as u64))
        } else if state.probing {
            (CircuitStateKind::HalfOpen, None)
        } else {
            (CircuitStateKind::Closed, None)
        };
        CircuitStatus {
            key: key.clone(),
            state: kind,
            failure_count: state.failure_count,
            failure_threshold: self.config.failure_threshold,
            retry_after_ms,
        }
    }
}

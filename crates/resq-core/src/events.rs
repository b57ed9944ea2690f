//! Structured events for UI feedback (toasts, status bars).
//!
//! The core only produces these; it never depends on whether or how they are
//! displayed.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::key::OperationKey;

/// Outcome of replaying one queued operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReplayOutcome {
    Delivered,
    /// Still queued; `reason` is the display form of the failure.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResilienceEvent {
    RetryAttempted {
        key: OperationKey,
        attempt: u32,
        delay_ms: u64,
    },
    CircuitOpened {
        key: OperationKey,
    },
    OperationQueued {
        id: Uuid,
    },
    OperationReplayed {
        id: Uuid,
        outcome: ReplayOutcome,
    },
}

/// Receiver of resilience events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ResilienceEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ResilienceEvent) {}
}

/// Logs every event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ResilienceEvent) {
        match &event {
            ResilienceEvent::RetryAttempted {
                key,
                attempt,
                delay_ms,
            } => tracing::info!(key = %key, attempt, delay_ms, "retrying operation"),
            ResilienceEvent::CircuitOpened { key } => {
                tracing::warn!(key = %key, "circuit opened")
            }
            ResilienceEvent::OperationQueued { id } => {
                tracing::info!(id = %id, "operation queued for later delivery")
            }
            ResilienceEvent::OperationReplayed { id, outcome } => {
                tracing::info!(id = %id, outcome = ?outcome, "queued operation replayed")
            }
        }
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ResilienceEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ResilienceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ResilienceEvent) {
        // Receiver gone means nobody is rendering feedback any more.
        let _ = self.tx.send(event);
    }
}

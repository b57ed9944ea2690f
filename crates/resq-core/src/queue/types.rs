//! Types stored in the durable queue.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::OperationKey;
use crate::retry::RetryPolicy;
use crate::transport::EndpointDescriptor;

/// A write that exhausted its retries (or hit an open circuit, or was made
/// offline) and must still be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: Uuid,
    pub operation_key: OperationKey,
    /// Opaque request body.
    pub payload: Vec<u8>,
    pub endpoint: EndpointDescriptor,
    /// Unix milliseconds.
    pub enqueued_at: i64,
    /// Delivery attempts made by replays (not counting the original run).
    pub attempt_count: u32,
    /// Monotonic insertion counter; orders records loaded from a store.
    pub seq: u64,
    /// Policy the operation is replayed with.
    #[serde(default)]
    pub policy: RetryPolicy,
}

/// Summary of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Operations delivered and removed, in replay order.
    pub delivered: Vec<Uuid>,
    /// Operations still queued after this pass, in replay order.
    pub failed: Vec<Uuid>,
    /// The pass was stopped before it reached every operation.
    pub interrupted: bool,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }
}

/// Current time as Unix milliseconds.
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

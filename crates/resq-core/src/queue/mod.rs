//! Durable offline queue.
//!
//! Holds writes that must eventually be delivered: operations that exhausted
//! their retries, hit an open circuit, or were submitted while offline. The
//! queue owns its records; everything else goes through this API.
//!
//! Every mutation is written back through a [`QueueStore`]. When the store
//! fails the queue keeps working from memory for the rest of the session and
//! logs the failure; nothing is dropped from the in-memory view.
//!
//! A namespace that could not be read at open is never overwritten blind:
//! each later write first retries the read and merges what the store held.
//! Records that no longer decode are carried along untouched.

mod json_store;
mod replay;
mod sqlite_store;
mod store;
mod types;

pub use json_store::JsonFileStore;
pub use sqlite_store::SqliteStore;
pub use store::{MemoryStore, QueueStore, Records};
pub use types::{QueuedOperation, ReplayReport};

pub(crate) use types::unix_millis;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::events::{EventSink, NullSink, ResilienceEvent};
use crate::key::OperationKey;
use crate::retry::RetryPolicy;
use crate::transport::EndpointDescriptor;

/// Default store namespace.
pub const DEFAULT_NAMESPACE: &str = "resq.pending";

#[derive(Debug, Default)]
struct QueueState {
    /// Pending operations in insertion order.
    ops: Vec<QueuedOperation>,
    /// Stored records that failed to decode, written back as they were.
    unreadable: Records,
    next_seq: u64,
    /// The store could not be read at open.
    unloaded: bool,
}

impl QueueState {
    fn loaded(ops: Vec<QueuedOperation>, unreadable: Records) -> Self {
        let next_seq = ops.last().map(|op| op.seq + 1).unwrap_or(0);
        Self {
            ops,
            unreadable,
            next_seq,
            unloaded: false,
        }
    }
}

pub struct DurableQueue {
    store: Arc<dyn QueueStore>,
    namespace: String,
    state: Mutex<QueueState>,
    degraded: AtomicBool,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("namespace", &self.namespace)
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

impl DurableQueue {
    /// Open the queue stored under `namespace`, loading whatever a previous
    /// session left behind. An unreadable store starts the queue empty.
    pub async fn open(store: Arc<dyn QueueStore>, namespace: impl Into<String>) -> Self {
        Self::open_with_sink(store, namespace, Arc::new(NullSink)).await
    }

    pub async fn open_with_sink(
        store: Arc<dyn QueueStore>,
        namespace: impl Into<String>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let namespace = namespace.into();
        let degraded = AtomicBool::new(false);
        let state = match store.get(&namespace).await {
            Ok(records) => {
                let (ops, unreadable) = decode_records(&namespace, records);
                if !ops.is_empty() {
                    tracing::info!(namespace = %namespace, pending = ops.len(), "loaded durable queue");
                }
                QueueState::loaded(ops, unreadable)
            }
            Err(e) => {
                tracing::warn!(
                    namespace = %namespace,
                    "could not load durable queue; starting in memory and leaving the store untouched: {:#}",
                    e
                );
                degraded.store(true, Ordering::Relaxed);
                QueueState {
                    unloaded: true,
                    ..QueueState::default()
                }
            }
        };
        Self {
            store,
            namespace,
            state: Mutex::new(state),
            degraded,
            sink,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// True once a store read or write failed; pending operations then only
    /// live in memory until a later read-and-write succeeds.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Park an operation for later delivery. Only call this for operations
    /// the caller marked durable.
    pub async fn enqueue(
        &self,
        operation_key: OperationKey,
        payload: Vec<u8>,
        endpoint: EndpointDescriptor,
        policy: RetryPolicy,
    ) -> Uuid {
        let id = Uuid::new_v4();
        {
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            tracing::info!(id = %id, key = %operation_key, seq, "queued operation for later delivery");
            state.ops.push(QueuedOperation {
                id,
                operation_key,
                payload,
                endpoint,
                enqueued_at: unix_millis(),
                attempt_count: 0,
                seq,
                policy,
            });
            self.persist(&mut state).await;
        }
        self.sink.emit(ResilienceEvent::OperationQueued { id });
        id
    }

    /// Pending operations in insertion order.
    pub async fn list_pending(&self) -> Vec<QueuedOperation> {
        self.state.lock().await.ops.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<QueuedOperation> {
        self.state.lock().await.ops.iter().find(|op| op.id == id).cloned()
    }

    /// Remove an operation (delivered, or cancelled by the user).
    /// Returns false if it was not queued.
    pub async fn remove(&self, id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        let before = state.ops.len();
        state.ops.retain(|op| op.id != id);
        if state.ops.len() == before {
            return false;
        }
        tracing::debug!(id = %id, "removed queued operation");
        self.persist(&mut state).await;
        true
    }

    /// Bump the replay attempt counter. Returns the new count, or None if the
    /// operation is not queued.
    pub async fn increment_attempt(&self, id: Uuid) -> Option<u32> {
        let mut state = self.state.lock().await;
        let op = state.ops.iter_mut().find(|op| op.id == id)?;
        op.attempt_count = op.attempt_count.saturating_add(1);
        let count = op.attempt_count;
        self.persist(&mut state).await;
        Some(count)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.ops.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.ops.is_empty()
    }

    /// Drop every pending operation (explicit user action). Records a
    /// previous session stored are only dropped if they could be read.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let dropped = state.ops.len();
        state.ops.clear();
        if state.unloaded {
            tracing::warn!(namespace = %self.namespace, "durable queue store unreadable; cleared in-memory operations only");
            return dropped;
        }
        state.unreadable.clear();
        if let Err(e) = self.store.delete(&self.namespace).await {
            tracing::warn!(namespace = %self.namespace, "could not clear durable queue store: {:#}", e);
            self.degraded.store(true, Ordering::Relaxed);
        }
        dropped
    }

    async fn persist(&self, state: &mut QueueState) {
        if state.unloaded && !self.reload(state).await {
            return;
        }
        let records = match encode_records(state) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, "could not serialize durable queue: {:#}", e);
                self.degraded.store(true, Ordering::Relaxed);
                return;
            }
        };
        match self.store.set(&self.namespace, &records).await {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!(namespace = %self.namespace, "durable queue store recovered");
                }
            }
            Err(e) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    pending = state.ops.len(),
                    "could not persist durable queue; keeping operations in memory only: {:#}",
                    e
                );
                self.degraded.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Retry the read that failed at open. On success the stored operations
    /// go first and this session's operations are appended after them.
    async fn reload(&self, state: &mut QueueState) -> bool {
        let records = match self.store.get(&self.namespace).await {
            Ok(records) => records,
            Err(e) => {
                tracing::debug!(namespace = %self.namespace, "durable queue store still unreadable; not writing: {:#}", e);
                return false;
            }
        };
        let (stored, unreadable) = decode_records(&self.namespace, records);
        let restored = stored.len();
        let mut merged = QueueState::loaded(stored, unreadable);
        for mut op in std::mem::take(&mut state.ops) {
            op.seq = merged.next_seq;
            merged.next_seq += 1;
            merged.ops.push(op);
        }
        *state = merged;
        tracing::info!(namespace = %self.namespace, restored, pending = state.ops.len(), "durable queue store readable again; merged stored operations");
        true
    }
}

fn encode_records(state: &QueueState) -> serde_json::Result<Records> {
    let mut records = state.unreadable.clone();
    for op in &state.ops {
        records.insert(op.id.to_string(), serde_json::to_value(op)?);
    }
    Ok(records)
}

/// Decode stored records. Ones that no longer parse are logged and returned
/// separately so they can be written back as they were.
fn decode_records(namespace: &str, records: Records) -> (Vec<QueuedOperation>, Records) {
    let mut ops = Vec::with_capacity(records.len());
    let mut unreadable = Records::new();
    for (id, value) in records {
        match serde_json::from_value::<QueuedOperation>(value.clone()) {
            Ok(op) => ops.push(op),
            Err(e) => {
                tracing::warn!(namespace, id = %id, "keeping unreadable queued record aside: {}", e);
                unreadable.insert(id, value);
            }
        }
    }
    ops.sort_by_key(|op| op.seq);
    (ops, unreadable)
}

//! Request layer: one entry point wiring breaker, executor, queue, transport
//! and connectivity together.
//!
//! Callers describe a request once ([`DurableRequest`]); the layer decides
//! whether to send it now, park it for later, or report the failure.

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitStatus};
use crate::connectivity::{ConnectivityMonitor, ConnectivitySnapshot};
use crate::control::CancelHandle;
use crate::events::EventSink;
use crate::key::OperationKey;
use crate::queue::{DurableQueue, QueueStore, ReplayReport};
use crate::retry::{ExecError, RetryExecutor, RetryPolicy};
use crate::transport::{EndpointDescriptor, Response, Transport};

/// A request plus how hard to try delivering it.
#[derive(Debug, Clone, PartialEq)]
pub struct DurableRequest {
    pub key: OperationKey,
    pub endpoint: EndpointDescriptor,
    pub payload: Vec<u8>,
    pub policy: RetryPolicy,
    /// Durable requests are queued instead of failing when the network or
    /// the backend is unavailable. Reads should never be durable.
    pub durable: bool,
}

impl DurableRequest {
    /// Non-durable request with the default policy.
    pub fn new(key: OperationKey, endpoint: EndpointDescriptor, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            endpoint,
            payload: payload.into(),
            policy: RetryPolicy::default(),
            durable: false,
        }
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Result of a submission that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    Delivered(Response),
    /// Parked in the durable queue under this id.
    Queued(Uuid),
}

pub struct RequestLayer {
    executor: RetryExecutor,
    queue: Arc<DurableQueue>,
    transport: Arc<dyn Transport>,
    monitor: Arc<ConnectivityMonitor>,
}

impl std::fmt::Debug for RequestLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLayer")
            .field("executor", &self.executor)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl RequestLayer {
    /// Build every component around one event sink. The queue under
    /// `namespace` is loaded from `store` before this returns.
    pub async fn open(
        breaker: BreakerConfig,
        store: Arc<dyn QueueStore>,
        namespace: &str,
        transport: Arc<dyn Transport>,
        signal: watch::Receiver<bool>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::with_sink(breaker, Arc::clone(&sink)));
        let executor = RetryExecutor::with_sink(breaker, Arc::clone(&sink));
        let queue = Arc::new(DurableQueue::open_with_sink(store, namespace, sink).await);
        let monitor = Arc::new(ConnectivityMonitor::new(
            signal,
            Arc::clone(&queue),
            executor.clone(),
            Arc::clone(&transport),
        ));
        Self {
            executor,
            queue,
            transport,
            monitor,
        }
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.executor.breaker()
    }

    pub fn connectivity(&self) -> ConnectivitySnapshot {
        self.monitor.snapshot()
    }

    /// Current state of every circuit that has seen traffic.
    pub fn circuits(&self) -> Vec<CircuitStatus> {
        self.breaker().snapshots()
    }

    /// Send `req`, retrying per its policy.
    ///
    /// Durable requests are queued (never attempted) while offline, and
    /// queued after an open circuit or exhausted retries. Terminal failures
    /// come back as `Err` even for durable requests.
    pub async fn submit(&self, req: DurableRequest) -> Result<Submitted, ExecError> {
        self.submit_inner(req, None).await
    }

    /// Like [`submit`](Self::submit), but `handle` can abandon the request.
    /// [`CancelHandle::cancel_and_queue`] parks a durable request instead.
    pub async fn submit_cancellable(
        &self,
        req: DurableRequest,
        handle: &CancelHandle,
    ) -> Result<Submitted, ExecError> {
        self.submit_inner(req, Some(handle)).await
    }

    async fn submit_inner(
        &self,
        req: DurableRequest,
        handle: Option<&CancelHandle>,
    ) -> Result<Submitted, ExecError> {
        if req.durable && !self.monitor.is_online() {
            tracing::info!(key = %req.key, "offline; queueing durable request without attempting it");
            return Ok(Submitted::Queued(self.park(req).await));
        }

        let transport = self.transport.as_ref();
        let (endpoint, payload) = (&req.endpoint, req.payload.as_slice());
        let send = || transport.send(endpoint, payload, None);
        let result = match handle {
            Some(h) => {
                self.executor
                    .run_cancellable(&req.key, &req.policy, h.token(), send)
                    .await
            }
            None => self.executor.run(&req.key, &req.policy, send).await,
        };

        match result {
            Ok(resp) => Ok(Submitted::Delivered(resp)),
            Err(ExecError::Cancelled { key }) if handle.is_some_and(CancelHandle::wants_queue) => {
                if req.durable {
                    tracing::info!(key = %key, "cancelled with queue intent; parking request");
                    Ok(Submitted::Queued(self.park(req).await))
                } else {
                    tracing::debug!(key = %key, "queue intent ignored for non-durable request");
                    Err(ExecError::Cancelled { key })
                }
            }
            Err(e) if req.durable && e.is_deferrable() => {
                tracing::warn!(key = %req.key, "deferring durable request: {}", e);
                Ok(Submitted::Queued(self.park(req).await))
            }
            Err(e) => Err(e),
        }
    }

    async fn park(&self, req: DurableRequest) -> Uuid {
        self.queue
            .enqueue(req.key, req.payload, req.endpoint, req.policy)
            .await
    }

    /// Replay the queue now, regardless of connectivity transitions.
    pub async fn replay_pending(&self) -> ReplayReport {
        self.monitor.replay().await
    }

    /// Drop a queued operation (explicit user cancellation). Returns false if
    /// no such operation was queued.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let removed = self.queue.remove(id).await;
        if removed {
            tracing::info!(id = %id, "queued operation cancelled by user");
        }
        removed
    }
}

#[cfg(test)]
mod tests;

//! Sequential replay of queued operations through the retry executor.

use tokio_util::sync::CancellationToken;

use crate::events::{ReplayOutcome, ResilienceEvent};
use crate::retry::{ExecError, RetryExecutor};
use crate::transport::Transport;

use super::types::ReplayReport;
use super::DurableQueue;

impl DurableQueue {
    /// Replay a snapshot of the pending operations, one at a time, in
    /// insertion order.
    ///
    /// Each operation goes back through `executor` with its own key and
    /// policy. Delivered operations are removed; failed ones stay queued with
    /// their attempt count bumped. Operations cancelled while the pass runs
    /// are skipped.
    pub async fn replay_with(&self, executor: &RetryExecutor, transport: &dyn Transport) -> ReplayReport {
        self.replay_until(executor, transport, &CancellationToken::new())
            .await
    }

    /// [`replay_with`](Self::replay_with) that stops once `stop` fires. The
    /// operation in flight stays queued without an attempt counted and the
    /// rest of the snapshot is left for the next pass.
    pub async fn replay_until(
        &self,
        executor: &RetryExecutor,
        transport: &dyn Transport,
        stop: &CancellationToken,
    ) -> ReplayReport {
        let pending = self.list_pending().await;
        let mut report = ReplayReport::default();
        if pending.is_empty() {
            return report;
        }
        tracing::info!(namespace = %self.namespace, pending = pending.len(), "replaying durable queue");

        for op in &pending {
            if stop.is_cancelled() {
                report.interrupted = true;
                break;
            }
            if self.get(op.id).await.is_none() {
                tracing::debug!(id = %op.id, "queued operation cancelled before replay");
                continue;
            }
            let id_text = op.id.to_string();
            let idempotency_key = id_text.as_str();
            let result = executor
                .run_cancellable(&op.operation_key, &op.policy, stop, move || {
                    transport.send(&op.endpoint, &op.payload, Some(idempotency_key))
                })
                .await;

            let outcome = match result {
                Ok(resp) => {
                    tracing::info!(id = %op.id, key = %op.operation_key, status = resp.status, "queued operation delivered");
                    self.remove(op.id).await;
                    report.delivered.push(op.id);
                    ReplayOutcome::Delivered
                }
                Err(ExecError::Cancelled { .. }) => {
                    tracing::info!(id = %op.id, "replay stopped; operation stays queued");
                    report.interrupted = true;
                    break;
                }
                Err(e) => {
                    let attempts = self.increment_attempt(op.id).await;
                    tracing::warn!(id = %op.id, key = %op.operation_key, replay_attempts = ?attempts, "queued operation still undeliverable: {}", e);
                    report.failed.push(op.id);
                    ReplayOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            self.sink.emit(ResilienceEvent::OperationReplayed { id: op.id, outcome });
        }
        report
    }
}

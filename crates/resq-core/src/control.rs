//! Caller-side cancellation of an in-flight submission.
//!
//! A [`CancelHandle`] is handed to [`RequestLayer::submit_cancellable`]; the
//! caller keeps a clone and fires it from elsewhere (a UI "cancel" button, a
//! Ctrl-C handler). Cancelling never counts as a failure on the breaker.
//!
//! [`RequestLayer::submit_cancellable`]: crate::layer::RequestLayer::submit_cancellable

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    /// Set when the cancellation asks for the request to be queued instead
    /// of dropped.
    queue_on_cancel: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon the submission. Nothing is queued.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Abandon the submission and park it in the durable queue (durable
    /// requests only).
    pub fn cancel_and_queue(&self) {
        self.queue_on_cancel.store(true, Ordering::Release);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True if the cancellation carried queue intent.
    pub fn wants_queue(&self) -> bool {
        self.queue_on_cancel.load(Ordering::Acquire)
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

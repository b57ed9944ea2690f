//! Online/offline tracking and queue replay on reconnect.
//!
//! The platform's network signal is a `tokio::sync::watch` channel of `bool`
//! (true = online). [`NetworkSignal`] is the sending side; whoever knows about
//! the network (an OS hook, or the HEAD probe in [`spawn_probe`]) flips it.
//! [`ConnectivityMonitor`] owns the process-wide [`ConnectivitySnapshot`] and
//! drains the durable queue through the retry executor when the state goes
//! from offline to online.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::{unix_millis, DurableQueue, ReplayReport};
use crate::retry::RetryExecutor;
use crate::transport::{CurlTransport, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySnapshot {
    pub is_online: bool,
    /// Unix millis of the last state change (monitor creation if none yet).
    pub last_transition_at: i64,
}

/// Sender side of the network-status signal.
#[derive(Debug, Clone)]
pub struct NetworkSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkSignal {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publish the current state. Receivers are only woken on a change.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}

pub struct ConnectivityMonitor {
    signal: watch::Receiver<bool>,
    snapshot: Mutex<ConnectivitySnapshot>,
    queue: Arc<DurableQueue>,
    executor: RetryExecutor,
    transport: Arc<dyn Transport>,
    /// Held for the duration of a replay pass so passes never overlap.
    replaying: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("snapshot", &self.snapshot())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl ConnectivityMonitor {
    /// The initial snapshot takes whatever state the signal currently holds.
    pub fn new(
        signal: watch::Receiver<bool>,
        queue: Arc<DurableQueue>,
        executor: RetryExecutor,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let is_online = *signal.borrow();
        Self {
            signal,
            snapshot: Mutex::new(ConnectivitySnapshot {
                is_online,
                last_transition_at: unix_millis(),
            }),
            queue,
            executor,
            transport,
            replaying: tokio::sync::Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_online(&self) -> bool {
        self.snapshot().is_online
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    /// Apply one observed network state. Returns the replay report when this
    /// was an offline -> online transition; None when nothing changed or the
    /// network went away.
    pub async fn apply(&self, online: bool) -> Option<ReplayReport> {
        {
            let mut snap = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
            if snap.is_online == online {
                return None;
            }
            snap.is_online = online;
            snap.last_transition_at = unix_millis();
        }
        if !online {
            tracing::info!("network offline; in-flight operations will fail and queue if durable");
            return None;
        }
        tracing::info!("network back online");
        Some(self.replay().await)
    }

    /// Replay the durable queue once, sequentially. Concurrent callers wait
    /// for the running pass instead of starting a second one. The pass stops
    /// when the signal drops to offline while it runs.
    pub async fn replay(&self) -> ReplayReport {
        let _pass = self.replaying.lock().await;
        let stop = CancellationToken::new();
        let mut rx = self.signal.clone();
        let _ = rx.borrow_and_update();
        let pass = self
            .queue
            .replay_until(&self.executor, self.transport.as_ref(), &stop);
        tokio::pin!(pass);
        let report = tokio::select! {
            report = &mut pass => report,
            () = went_offline(rx) => {
                tracing::info!("network lost during replay; stopping the pass");
                stop.cancel();
                pass.await
            }
        };
        if !report.delivered.is_empty() || !report.failed.is_empty() || report.interrupted {
            tracing::info!(
                delivered = report.delivered.len(),
                still_queued = report.failed.len(),
                interrupted = report.interrupted,
                "replay pass finished"
            );
        }
        report
    }

    /// Follow the signal until its sender goes away. If the session starts
    /// online, leftovers from a previous session are replayed first.
    pub async fn run(&self) {
        let mut rx = self.signal.clone();
        let current = *rx.borrow_and_update();
        if self.apply(current).await.is_none() && current && !self.queue.is_empty().await {
            self.replay().await;
        }
        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            self.apply(online).await;
        }
        tracing::debug!("network signal closed; connectivity monitor stopping");
    }
}

/// Resolves on the next change to offline; never if the sender goes away.
async fn went_offline(mut rx: watch::Receiver<bool>) {
    loop {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if !*rx.borrow_and_update() {
            return;
        }
    }
}

/// Periodically HEAD `url` and publish reachability into `signal`.
pub fn spawn_probe(
    transport: CurlTransport,
    url: String,
    interval: Duration,
    signal: NetworkSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let online = transport.probe(&url).await;
            if online != signal.is_online() {
                tracing::debug!(url = %url, online, "connectivity probe changed state");
            }
            signal.set_online(online);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::OperationKey;
    use crate::queue::MemoryStore;
    use crate::test_support::{endpoint, executor, fast_policy, url, FakeTransport};

    async fn monitor(
        signal: &NetworkSignal,
        transport: Arc<FakeTransport>,
    ) -> (Arc<ConnectivityMonitor>, Arc<DurableQueue>) {
        let queue = Arc::new(DurableQueue::open(Arc::new(MemoryStore::new()), "ns").await);
        let monitor = ConnectivityMonitor::new(signal.subscribe(), Arc::clone(&queue), executor(), transport);
        (Arc::new(monitor), queue)
    }

    async fn park(queue: &DurableQueue, path: &str) -> uuid::Uuid {
        queue
            .enqueue(
                OperationKey::new(format!("form_submit:{path}")),
                b"{}".to_vec(),
                endpoint(path),
                fast_policy(),
            )
            .await
    }

    #[test]
    fn signal_only_wakes_on_change() {
        let signal = NetworkSignal::new(true);
        let mut rx = signal.subscribe();
        signal.set_online(true);
        assert!(!rx.has_changed().unwrap());
        signal.set_online(false);
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
        assert!(!signal.is_online());
    }

    #[tokio::test]
    async fn initial_snapshot_follows_signal() {
        let signal = NetworkSignal::new(false);
        let (monitor, _) = monitor(&signal, FakeTransport::new()).await;
        assert!(!monitor.snapshot().is_online);
        assert!(monitor.snapshot().last_transition_at > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn going_offline_only_updates_snapshot() {
        let signal = NetworkSignal::new(true);
        let transport = FakeTransport::new();
        let (monitor, queue) = monitor(&signal, Arc::clone(&transport)).await;
        park(&queue, "/expenses/add").await;

        assert_eq!(monitor.apply(false).await, None);
        assert!(!monitor.is_online());
        assert!(transport.calls().is_empty());
        assert_eq!(queue.len().await, 1);
        // Same state again: no transition.
        assert_eq!(monitor.apply(false).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replays_in_enqueue_order() {
        let signal = NetworkSignal::new(false);
        let transport = FakeTransport::new();
        transport.fail("/expenses/add", 500);
        let (monitor, queue) = monitor(&signal, Arc::clone(&transport)).await;
        let first = park(&queue, "/expenses/add").await;
        let second = park(&queue, "/restaurants/add").await;

        let report = monitor.apply(true).await.expect("offline -> online replays");
        assert_eq!(report.failed, vec![first]);
        assert_eq!(report.delivered, vec![second]);
        assert_eq!(
            transport.urls(),
            vec![url("/expenses/add"), url("/expenses/add"), url("/restaurants/add")]
        );
        let left = queue.list_pending().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, first);
        assert_eq!(left[0].attempt_count, 1);
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_network_stops_a_running_replay() {
        let signal = NetworkSignal::new(true);
        let transport = FakeTransport::new();
        transport.hang("/expenses/add");
        let (monitor, queue) = monitor(&signal, Arc::clone(&transport)).await;
        let first = park(&queue, "/expenses/add").await;
        let second = park(&queue, "/restaurants/add").await;

        let pass = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.replay().await }
        });
        while transport.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        signal.set_online(false);
        let report = pass.await.unwrap();

        assert!(report.interrupted);
        assert!(report.delivered.is_empty() && report.failed.is_empty());
        assert_eq!(transport.urls(), vec![url("/expenses/add")]);
        let left = queue.list_pending().await;
        assert_eq!(left.iter().map(|op| op.id).collect::<Vec<_>>(), vec![first, second]);
        assert!(left.iter().all(|op| op.attempt_count == 0));
        let key = OperationKey::new("form_submit:/expenses/add");
        assert_eq!(monitor.executor.breaker().status(&key).failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_follows_signal_until_sender_dropped() {
        let signal = NetworkSignal::new(false);
        let transport = FakeTransport::new();
        let (monitor, queue) = monitor(&signal, Arc::clone(&transport)).await;
        park(&queue, "/expenses/add").await;

        let task = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.run().await }
        });
        tokio::task::yield_now().await;
        assert!(transport.calls().is_empty());

        signal.set_online(true);
        while !queue.is_empty().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(transport.calls().len(), 1);

        drop(signal);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_leftovers_when_starting_online() {
        let signal = NetworkSignal::new(true);
        let transport = FakeTransport::new();
        let (monitor, queue) = monitor(&signal, Arc::clone(&transport)).await;
        park(&queue, "/expenses/add").await;

        let task = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.run().await }
        });
        while !queue.is_empty().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(signal);
        task.await.unwrap();
        assert_eq!(transport.calls().len(), 1);
    }
}

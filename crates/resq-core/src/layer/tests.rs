use std::time::Duration;

use super::*;
use crate::connectivity::NetworkSignal;
use crate::events::{ChannelSink, ResilienceEvent};
use crate::queue::MemoryStore;
use crate::retry::ClassifiedError;
use crate::test_support::{endpoint, fast_policy, FakeTransport};

struct Harness {
    layer: RequestLayer,
    transport: Arc<FakeTransport>,
    signal: NetworkSignal,
    events: tokio::sync::mpsc::UnboundedReceiver<ResilienceEvent>,
}

async fn harness(breaker: BreakerConfig) -> Harness {
    let transport = FakeTransport::new();
    let signal = NetworkSignal::new(true);
    let (sink, events) = ChannelSink::new();
    let layer = RequestLayer::open(
        breaker,
        Arc::new(MemoryStore::new()),
        "test",
        Arc::clone(&transport) as Arc<dyn Transport>,
        signal.subscribe(),
        Arc::new(sink),
    )
    .await;
    Harness {
        layer,
        transport,
        signal,
        events,
    }
}

fn request(path: &str) -> DurableRequest {
    DurableRequest::new(
        OperationKey::new(format!("form_submit:{path}")),
        endpoint(path),
        b"name=Lunch".to_vec(),
    )
    .with_policy(fast_policy())
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ResilienceEvent>) -> Vec<ResilienceEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn healthy_request_is_delivered() {
    let h = harness(BreakerConfig::default()).await;
    let out = h.layer.submit(request("/expenses/add").durable()).await.unwrap();
    assert!(matches!(out, Submitted::Delivered(ref r) if r.status == 201));
    assert!(h.layer.queue().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn durable_request_while_offline_is_queued_without_attempt() {
    let mut h = harness(BreakerConfig::default()).await;
    h.layer.monitor().apply(false).await;

    let out = h.layer.submit(request("/expenses/add").durable()).await.unwrap();
    let Submitted::Queued(id) = out else {
        panic!("expected queued, got {out:?}");
    };
    assert!(h.transport.calls().is_empty());
    assert_eq!(drain(&mut h.events), vec![ResilienceEvent::OperationQueued { id }]);
}

#[tokio::test(start_paused = true)]
async fn non_durable_request_while_offline_is_still_attempted() {
    let h = harness(BreakerConfig::default()).await;
    h.layer.monitor().apply(false).await;
    let out = h.layer.submit(request("/expenses/search")).await.unwrap();
    assert!(matches!(out, Submitted::Delivered(_)));
    assert_eq!(h.transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_durable_request_is_queued() {
    let h = harness(BreakerConfig::default()).await;
    h.transport.fail("/expenses/add", 503);

    let out = h.layer.submit(request("/expenses/add").durable()).await.unwrap();
    let Submitted::Queued(id) = out else {
        panic!("expected queued, got {out:?}");
    };
    assert_eq!(h.transport.calls().len(), 2);
    let op = h.layer.queue().get(id).await.unwrap();
    assert_eq!(op.payload, b"name=Lunch");
    assert_eq!(op.policy, fast_policy());
    assert_eq!(op.attempt_count, 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_plain_request_surfaces_error() {
    let h = harness(BreakerConfig::default()).await;
    h.transport.fail("/expenses/add", 503);

    let err = h.layer.submit(request("/expenses/add")).await.unwrap_err();
    assert!(matches!(
        err,
        ExecError::Failed {
            class: ClassifiedError::ServerError(503),
            attempts: 2,
            ..
        }
    ));
    assert!(h.layer.queue().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn terminal_failure_is_not_queued_even_when_durable() {
    let h = harness(BreakerConfig::default()).await;
    h.transport.fail("/expenses/add", 422);

    let err = h.layer.submit(request("/expenses/add").durable()).await.unwrap_err();
    assert_eq!(err.class(), Some(ClassifiedError::Validation));
    assert_eq!(h.transport.calls().len(), 1);
    assert!(h.layer.queue().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_queues_durable_request_without_attempt() {
    let h = harness(BreakerConfig {
        failure_threshold: 2,
        cool_down: Duration::from_secs(60),
    })
    .await;
    h.transport.fail("/expenses/add", 500);
    assert!(h.layer.submit(request("/expenses/add")).await.is_err());
    assert_eq!(h.transport.calls().len(), 2);

    let out = h.layer.submit(request("/expenses/add").durable()).await.unwrap();
    assert!(matches!(out, Submitted::Queued(_)));
    assert_eq!(h.transport.calls().len(), 2);

    let circuits = h.layer.circuits();
    assert_eq!(circuits.len(), 1);
    assert_eq!(circuits[0].failure_count, 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_abandons_without_queueing_or_penalty() {
    let h = harness(BreakerConfig::default()).await;
    h.transport.hang("/expenses/add");
    let handle = CancelHandle::new();

    let (out, ()) = tokio::join!(
        h.layer.submit_cancellable(request("/expenses/add").durable(), &handle),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        }
    );
    assert!(matches!(out, Err(ExecError::Cancelled { .. })));
    assert!(h.layer.queue().is_empty().await);
    assert_eq!(h.layer.breaker().status(&OperationKey::new("form_submit:/expenses/add")).failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_and_queue_parks_durable_request() {
    let h = harness(BreakerConfig::default()).await;
    h.transport.hang("/expenses/add");
    let handle = CancelHandle::new();

    let (out, ()) = tokio::join!(
        h.layer.submit_cancellable(request("/expenses/add").durable(), &handle),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel_and_queue();
        }
    );
    assert!(matches!(out, Ok(Submitted::Queued(_))));
    assert_eq!(h.layer.queue().len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_and_queue_ignored_for_plain_request() {
    let h = harness(BreakerConfig::default()).await;
    h.transport.hang("/expenses/search");
    let handle = CancelHandle::new();
    handle.cancel_and_queue();

    let out = h.layer.submit_cancellable(request("/expenses/search"), &handle).await;
    assert!(matches!(out, Err(ExecError::Cancelled { .. })));
    assert!(h.layer.queue().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn queued_request_is_delivered_on_reconnect() {
    let h = harness(BreakerConfig::default()).await;
    h.layer.monitor().apply(false).await;
    let Ok(Submitted::Queued(id)) = h.layer.submit(request("/expenses/add").durable()).await else {
        panic!("expected queued");
    };

    let report = h.layer.monitor().apply(true).await.unwrap();
    assert_eq!(report.delivered, vec![id]);
    assert!(h.layer.queue().is_empty().await);
    assert_eq!(h.transport.calls()[0].idempotency_key, Some(id.to_string()));
    assert!(h.signal.is_online());
}

#[tokio::test(start_paused = true)]
async fn replay_pending_and_user_cancel() {
    let h = harness(BreakerConfig::default()).await;
    h.transport.fail("/expenses/add", 503);
    let Ok(Submitted::Queued(first)) = h.layer.submit(request("/expenses/add").durable()).await else {
        panic!("expected queued");
    };
    let Ok(Submitted::Queued(second)) = h.layer.submit(request("/expenses/add").durable()).await else {
        panic!("expected queued");
    };

    assert!(h.layer.cancel(second).await);
    assert!(!h.layer.cancel(second).await);

    h.transport.heal("/expenses/add");
    let report = h.layer.replay_pending().await;
    assert_eq!(report.delivered, vec![first]);
    assert!(h.layer.queue().is_empty().await);
}

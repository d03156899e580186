// Connection lifecycle: once-only start, shared activation, teardown on last detach

mod common;

use common::{eventually, next_status, FakeTransport, WAIT};
use hublink_core::error::{ErrorCategory, HubError};
use hublink_core::lifecycle::{ActivationState, ConnectionLifecycle};
use hublink_core::status::{ConnectionStatus, StatusChannel};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio::sync::Barrier;
use tokio::time::timeout;
use tokio_test::{assert_pending, assert_ready_ok};

fn setup(transport: FakeTransport) -> (Arc<FakeTransport>, Arc<StatusChannel>, ConnectionLifecycle<FakeTransport>) {
    let transport = Arc::new(transport);
    let status = Arc::new(StatusChannel::new());
    let lifecycle = ConnectionLifecycle::new(Arc::clone(&transport), Arc::clone(&status));
    (transport, status, lifecycle)
}

#[tokio::test]
async fn test_start_twice_is_usage_error() {
    let (transport, status, lifecycle) = setup(FakeTransport::new());

    let signal = lifecycle.start().expect("first start succeeds");
    let err = lifecycle.start().expect_err("second start must fail");
    assert!(matches!(err, HubError::AlreadyInitialized));
    assert_eq!(err.category(), ErrorCategory::Usage);

    // The failed call had no side effect and the first signal still works
    assert_eq!(transport.starts(), 0);
    assert_eq!(status.current(), ConnectionStatus::Uninitialized);

    let subscription = timeout(WAIT, signal.connect()).await.unwrap().unwrap();
    assert!(subscription.is_ready());
    assert_eq!(transport.starts(), 1);
}

#[tokio::test]
async fn test_activation_is_lazy() {
    let (transport, status, lifecycle) = setup(FakeTransport::new());
    let _signal = lifecycle.start().unwrap();

    tokio::task::yield_now().await;
    assert_eq!(lifecycle.state(), ActivationState::NotStarted);
    assert_eq!(transport.starts(), 0);
    assert_eq!(status.current(), ConnectionStatus::Uninitialized);
}

#[tokio::test]
async fn test_successful_start_publishes_connecting_then_connected() {
    let (transport, status, lifecycle) = setup(FakeTransport::new());
    let mut stream = status.observe();

    let signal = lifecycle.start().unwrap();
    let _subscription = timeout(WAIT, signal.connect()).await.unwrap().unwrap();

    assert_eq!(next_status(&mut stream).await, Some(ConnectionStatus::Uninitialized));
    assert_eq!(next_status(&mut stream).await, Some(ConnectionStatus::Connecting));
    assert_eq!(next_status(&mut stream).await, Some(ConnectionStatus::Connected));
    assert_eq!(lifecycle.state(), ActivationState::Started);
    assert_eq!(transport.starts(), 1);
}

#[tokio::test]
async fn test_concurrent_subscribers_share_one_start() {
    let (transport, status, lifecycle) = setup(FakeTransport::gated());
    let signal = lifecycle.start().unwrap();

    let mut subscriptions: Vec<_> = (0..8).map(|_| signal.subscribe().unwrap()).collect();
    assert_eq!(lifecycle.subscriber_count(), 8);
    assert!(eventually(|| transport.starts() == 1).await);
    assert_eq!(status.current(), ConnectionStatus::Connecting);

    transport.complete_start(Ok(()));
    for subscription in subscriptions.iter_mut() {
        timeout(WAIT, subscription.ready()).await.unwrap().unwrap();
    }

    // Late subscribers reuse the established transport
    let mut late = signal.subscribe().unwrap();
    timeout(WAIT, late.ready()).await.unwrap().unwrap();

    assert_eq!(transport.starts(), 1);
    assert_eq!(status.current(), ConnectionStatus::Connected);
}

/// Attach `tasks` subscribers from separate tasks at once, then release the
/// start with `outcome` and collect what each subscriber saw
async fn race_subscribers(tasks: usize, outcome: Result<(), &str>) -> (Arc<FakeTransport>, Vec<Result<(), String>>) {
    let (transport, _status, lifecycle) = setup(FakeTransport::gated());
    let signal = lifecycle.start().unwrap();
    let barrier = Arc::new(Barrier::new(tasks));

    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let signal = signal.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                let mut subscription = signal.subscribe().unwrap();
                subscription.ready().await.map_err(|e| e.to_string())
            })
        })
        .collect();

    assert!(eventually(|| lifecycle.subscriber_count() == tasks).await);
    transport.complete_start(outcome);

    let mut results = Vec::with_capacity(tasks);
    for handle in handles {
        results.push(timeout(WAIT, handle).await.unwrap().unwrap());
    }
    (transport, results)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_subscribers_share_one_successful_start() {
    let (transport, results) = race_subscribers(16, Ok(())).await;

    assert_eq!(transport.starts(), 1);
    assert!(results.iter().all(|result| result.is_ok()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_subscribers_share_one_failure() {
    let (transport, results) = race_subscribers(16, Err("handshake rejected")).await;

    assert_eq!(transport.starts(), 1);
    let first = results[0].clone().unwrap_err();
    assert!(first.contains("handshake rejected"));
    assert!(results.iter().all(|result| result.as_ref().err() == Some(&first)));
}

#[tokio::test]
async fn test_ready_is_pending_until_start_completes() {
    let (transport, _status, lifecycle) = setup(FakeTransport::gated());
    let signal = lifecycle.start().unwrap();
    let mut subscription = signal.subscribe().unwrap();

    let mut ready = tokio_test::task::spawn(subscription.ready());
    assert_pending!(ready.poll());
    assert!(eventually(|| transport.starts() == 1).await);

    transport.complete_start(Ok(()));
    assert!(eventually(|| ready.is_woken()).await);
    assert_ready_ok!(ready.poll());
}

#[tokio::test]
async fn test_start_failure_reaches_every_subscriber() {
    let (transport, status, lifecycle) = setup(FakeTransport::gated());
    let mut stream = status.observe();
    let signal = lifecycle.start().unwrap();

    let mut first = signal.subscribe().unwrap();
    let mut second = signal.subscribe().unwrap();
    transport.complete_start(Err("connection refused"));

    for subscription in [&mut first, &mut second] {
        let err = timeout(WAIT, subscription.ready()).await.unwrap().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Start);
        assert!(err.to_string().contains("connection refused"));
    }

    assert_eq!(lifecycle.state(), ActivationState::Faulted);
    assert_eq!(transport.starts(), 1);

    // Status stays at Connecting after a failed start
    assert_eq!(next_status(&mut stream).await, Some(ConnectionStatus::Uninitialized));
    assert_eq!(next_status(&mut stream).await, Some(ConnectionStatus::Connecting));
    assert!(stream.try_recv().is_none());
    assert_eq!(status.current(), ConnectionStatus::Connecting);
}

#[tokio::test]
async fn test_connect_failure_releases_subscription() {
    let (transport, _status, lifecycle) = setup(FakeTransport::failing("no route to host"));
    let signal = lifecycle.start().unwrap();

    let err = timeout(WAIT, signal.connect()).await.unwrap().unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(lifecycle.subscriber_count(), 0);
    assert_eq!(lifecycle.state(), ActivationState::Stopped);
    assert_eq!(transport.stops(), 1);
}

#[tokio::test]
async fn test_stop_only_after_last_detach() {
    let (transport, _status, lifecycle) = setup(FakeTransport::new());
    let signal = lifecycle.start().unwrap();

    let first = timeout(WAIT, signal.connect()).await.unwrap().unwrap();
    let second = timeout(WAIT, signal.connect()).await.unwrap().unwrap();

    first.detach().await;
    assert_eq!(transport.stops(), 0);
    assert_eq!(lifecycle.state(), ActivationState::Started);

    second.detach().await;
    assert_eq!(transport.stops(), 1);
    assert_eq!(lifecycle.state(), ActivationState::Stopped);
}

#[tokio::test]
async fn test_dropping_last_subscription_stops_transport() {
    let (transport, _status, lifecycle) = setup(FakeTransport::new());
    let signal = lifecycle.start().unwrap();

    let subscription = timeout(WAIT, signal.connect()).await.unwrap().unwrap();
    drop(subscription);

    assert!(eventually(|| transport.stops() == 1).await);
    assert_eq!(transport.starts(), 1);
}

#[tokio::test]
async fn test_stop_failure_is_swallowed() {
    let (transport, _status, lifecycle) = setup(FakeTransport::new());
    transport.fail_stops();
    let signal = lifecycle.start().unwrap();

    let subscription = timeout(WAIT, signal.connect()).await.unwrap().unwrap();
    subscription.detach().await;

    assert_eq!(transport.stops(), 1);
    assert_eq!(lifecycle.state(), ActivationState::Stopped);
}

#[tokio::test]
async fn test_detach_during_start_cancels_and_stops() {
    let (transport, status, lifecycle) = setup(FakeTransport::gated());
    let signal = lifecycle.start().unwrap();

    let subscription = signal.subscribe().unwrap();
    assert!(eventually(|| transport.starts() == 1).await);
    subscription.detach().await;

    assert_eq!(transport.stops(), 1);
    assert_eq!(lifecycle.state(), ActivationState::Stopped);

    // A start completing after cancellation never reports Connected
    transport.complete_start(Ok(()));
    tokio::task::yield_now().await;
    assert_eq!(status.current(), ConnectionStatus::Connecting);
}

#[tokio::test]
async fn test_stopped_activation_cannot_restart() {
    let (transport, _status, lifecycle) = setup(FakeTransport::new());
    let signal = lifecycle.start().unwrap();

    let subscription = timeout(WAIT, signal.connect()).await.unwrap().unwrap();
    subscription.detach().await;

    let err = signal.subscribe().unwrap_err();
    assert!(matches!(err, HubError::ConnectionStopped));
    assert_eq!(transport.starts(), 1);
    assert_eq!(transport.stops(), 1);
}

#[test]
fn test_subscribe_outside_runtime_fails() {
    let (transport, _status, lifecycle) = setup(FakeTransport::new());
    let signal = lifecycle.start().unwrap();

    let err = signal.subscribe().unwrap_err();
    assert!(matches!(err, HubError::NoRuntime { .. }));
    assert_eq!(transport.starts(), 0);
    assert_eq!(lifecycle.state(), ActivationState::NotStarted);
}

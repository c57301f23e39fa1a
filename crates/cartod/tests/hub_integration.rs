//! Integration tests for the hub: registration bookkeeping, fan-out,
//! scoping, backpressure and shutdown.
//!
//! Sessions are created directly and their outbound queues read by the
//! test, so no transport is involved.
//!
//! Tests may use `.unwrap()` and `.expect()`.

use std::sync::Arc;
use std::time::Duration;

use carto_core::{DisconnectReason, InterestFilter, SessionState, PROJECT_ID};
use carto_protocol::{Action, Changes, Envelope, Event, EventKind};
use cartod::config::HubConfig;
use cartod::hub::{spawn_hub, HubError, HubHandle, RelayOutcome};
use cartod::session::{ClientSession, Frame};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for the hub to process something
const HUB_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between condition checks
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Matches the default per-session queue capacity
const QUEUE_CAPACITY: usize = 256;

// ============================================================================
// Test Helpers
// ============================================================================

fn hub() -> HubHandle {
    spawn_hub(&HubConfig {
        relay_capacity: 1024,
        command_capacity: 64,
        max_sessions: 64,
    })
}

fn session(filter: InterestFilter) -> (Arc<ClientSession>, mpsc::Receiver<Frame>) {
    ClientSession::new(filter, QUEUE_CAPACITY)
}

fn scoped(project_id: &str) -> InterestFilter {
    InterestFilter::new().with(PROJECT_ID, project_id)
}

async fn recv_envelope(rx: &mut mpsc::Receiver<Frame>) -> Envelope {
    let frame = timeout(HUB_WAIT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("queue closed");
    Envelope::from_json(&frame).expect("valid envelope")
}

async fn wait_for<F: Fn() -> bool>(condition: F, what: &str) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < HUB_WAIT_TIMEOUT, "timed out waiting for {what}");
        sleep(POLL_INTERVAL).await;
    }
}

fn task_id(envelope: &Envelope) -> String {
    match envelope.decode().unwrap() {
        Event::TaskCreated(e) | Event::TaskUpdated(e) | Event::TaskDeleted(e) => e.task_id,
        other => panic!("expected a task event, got {other:?}"),
    }
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_client_count_tracks_register_and_unregister() {
    let hub = hub();
    let (a, _ra) = session(InterestFilter::new());
    let (b, _rb) = session(InterestFilter::new());
    let (c, _rc) = session(InterestFilter::new());

    hub.register(Arc::clone(&a)).await.unwrap();
    hub.register(Arc::clone(&b)).await.unwrap();
    assert_eq!(hub.client_count(), 2);

    assert!(hub.unregister(a.id(), DisconnectReason::Unregistered).await);
    // Unregistering an absent session changes nothing.
    assert!(!hub.unregister(a.id(), DisconnectReason::Unregistered).await);
    assert_eq!(hub.client_count(), 1);

    hub.register(Arc::clone(&c)).await.unwrap();
    assert!(hub.unregister(b.id(), DisconnectReason::ClientClosed).await);
    assert!(!hub.unregister(b.id(), DisconnectReason::ClientClosed).await);
    assert_eq!(hub.client_count(), 1);

    let ids: Vec<_> = hub.sessions().into_iter().map(|info| info.id).collect();
    assert_eq!(ids, vec![c.id()]);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_registered_session_is_active_and_unregistered_is_closing() {
    let hub = hub();
    let (a, mut ra) = session(InterestFilter::new());

    hub.register(Arc::clone(&a)).await.unwrap();
    assert_eq!(a.state(), SessionState::Active);

    hub.unregister(a.id(), DisconnectReason::Unregistered).await;
    assert_eq!(a.state(), SessionState::Closing);
    assert_eq!(a.close_reason(), Some(DisconnectReason::Unregistered));
    // Queue closed: the writer would see end-of-stream.
    assert!(ra.recv().await.is_none());

    hub.shutdown().await;
}

#[tokio::test]
async fn test_registry_capacity_is_enforced() {
    let hub = spawn_hub(&HubConfig {
        max_sessions: 2,
        ..HubConfig::default()
    });
    let (a, _ra) = session(InterestFilter::new());
    let (b, _rb) = session(InterestFilter::new());
    let (c, _rc) = session(InterestFilter::new());

    hub.register(a).await.unwrap();
    hub.register(b).await.unwrap();
    let err = hub.register(Arc::clone(&c)).await.unwrap_err();

    assert!(matches!(err, HubError::RegistryFull { max: 2 }));
    assert_eq!(hub.client_count(), 2);
    assert_eq!(c.state(), SessionState::Connecting);

    hub.shutdown().await;
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn test_broadcast_with_no_sessions_never_blocks_or_errors() {
    let hub = spawn_hub(&HubConfig {
        relay_capacity: 4,
        ..HubConfig::default()
    });

    let outcomes = timeout(HUB_WAIT_TIMEOUT, async {
        let mut outcomes = Vec::new();
        for i in 0..1_000 {
            outcomes.push(hub.broadcast_task_deleted(&format!("t{i}"), "b1").unwrap());
        }
        outcomes
    })
    .await
    .expect("broadcast blocked");

    assert!(outcomes
        .iter()
        .all(|o| matches!(o, RelayOutcome::Queued | RelayOutcome::DroppedFull)));
    // The relay holds 4; the rest of a tight burst is dropped, not buffered.
    assert!(outcomes.contains(&RelayOutcome::DroppedFull));
    assert_eq!(hub.client_count(), 0);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_filtered_broadcast_reaches_only_matching_scope() {
    let hub = hub();
    let (a, mut ra) = session(scoped("p1"));
    let (b, mut rb) = session(scoped("p2"));
    let (c, mut rc) = session(InterestFilter::new());
    for s in [&a, &b, &c] {
        hub.register(Arc::clone(s)).await.unwrap();
    }

    let scoped_event = Envelope::task_deleted("scoped", "b1").unwrap();
    assert_eq!(
        hub.broadcast_filtered(&scoped_event, PROJECT_ID, "p1").unwrap(),
        RelayOutcome::Queued
    );
    hub.broadcast_task_deleted("marker", "b1").unwrap();

    assert_eq!(task_id(&recv_envelope(&mut ra).await), "scoped");
    assert_eq!(task_id(&recv_envelope(&mut ra).await), "marker");
    // B and C see the marker first: the scoped event never reached them.
    assert_eq!(task_id(&recv_envelope(&mut rb).await), "marker");
    assert_eq!(task_id(&recv_envelope(&mut rc).await), "marker");

    hub.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_evicts_slow_consumer_only() {
    let hub = hub();
    let (a, _ra) = session(scoped("p1"));
    let (b, mut rb) = session(scoped("p2"));
    let (c, mut rc) = session(InterestFilter::new());
    for s in [&a, &b, &c] {
        hub.register(Arc::clone(s)).await.unwrap();
    }

    // A never drains its queue.
    for i in 0..QUEUE_CAPACITY {
        a.enqueue(Frame::from(format!("backlog-{i}"))).unwrap();
    }

    hub.broadcast_task_deleted("overflow", "b1").unwrap();
    wait_for(|| hub.client_count() == 2, "slow consumer eviction").await;

    assert_eq!(a.close_reason(), Some(DisconnectReason::SlowConsumer));
    assert!(a.state() >= SessionState::Closing);
    assert!(!hub.sessions().iter().any(|info| info.id == a.id()));

    hub.broadcast_task_deleted("next", "b1").unwrap();
    for rx in [&mut rb, &mut rc] {
        assert_eq!(task_id(&recv_envelope(rx).await), "overflow");
        assert_eq!(task_id(&recv_envelope(rx).await), "next");
    }

    hub.shutdown().await;
}

#[tokio::test]
async fn test_delivery_preserves_order_per_session() {
    let hub = hub();
    let (a, mut ra) = session(InterestFilter::new());
    hub.register(a).await.unwrap();

    for i in 0..200 {
        hub.broadcast_task_deleted(&format!("t{i}"), "b1").unwrap();
    }

    for i in 0..200 {
        assert_eq!(task_id(&recv_envelope(&mut ra).await), format!("t{i}"));
    }

    hub.shutdown().await;
}

#[tokio::test]
async fn test_task_updated_round_trip_through_hub() {
    let hub = hub();
    let (a, mut ra) = session(InterestFilter::new());
    hub.register(a).await.unwrap();

    let task = json!({"id": "t1", "title": "Write docs", "status": "in_progress"});
    let mut changes = Changes::new();
    changes.insert("status".to_string(), json!("in_progress"));

    hub.broadcast_task_updated("t1", "b1", changes.clone(), &task)
        .unwrap();

    let envelope = recv_envelope(&mut ra).await;
    assert_eq!(envelope.kind(), EventKind::TaskUpdated);
    match envelope.decode().unwrap() {
        Event::TaskUpdated(event) => {
            assert_eq!(event.task_id, "t1");
            assert_eq!(event.board_id, "b1");
            assert_eq!(event.action, Action::Updated);
            assert_eq!(event.changes, Some(changes));
            assert_eq!(event.task, Some(task));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    hub.shutdown().await;
}

#[tokio::test]
async fn test_typed_broadcasts_carry_matching_kinds() {
    let hub = hub();
    let (a, mut ra) = session(InterestFilter::new());
    hub.register(a).await.unwrap();

    let entity = json!({"id": "x"});
    hub.broadcast_task_created("t1", "b1", &entity).unwrap();
    hub.broadcast_project_created("p1", &entity).unwrap();
    hub.broadcast_project_updated("p1", Changes::new(), &entity).unwrap();
    hub.broadcast_board_updated("b1", "p1", Changes::new(), &entity).unwrap();

    let kinds = [
        EventKind::TaskCreated,
        EventKind::ProjectCreated,
        EventKind::ProjectUpdated,
        EventKind::BoardUpdated,
    ];
    for kind in kinds {
        let envelope = recv_envelope(&mut ra).await;
        assert_eq!(envelope.kind(), kind);
        assert_eq!(envelope.decode().unwrap().kind(), kind);
    }

    hub.shutdown().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_everything_and_rejects_registration() {
    let hub = hub();
    let (a, mut ra) = session(InterestFilter::new());
    let (b, _rb) = session(scoped("p1"));
    hub.register(Arc::clone(&a)).await.unwrap();
    hub.register(Arc::clone(&b)).await.unwrap();

    hub.shutdown().await;

    assert_eq!(hub.client_count(), 0);
    assert!(!hub.is_running());
    assert_eq!(a.close_reason(), Some(DisconnectReason::HubShutdown));
    assert_eq!(b.close_reason(), Some(DisconnectReason::HubShutdown));
    assert!(ra.recv().await.is_none());

    let (late, _rl) = session(InterestFilter::new());
    assert!(matches!(
        hub.register(Arc::clone(&late)).await,
        Err(HubError::Closed)
    ));
    assert_eq!(late.state(), SessionState::Connecting);
    assert_eq!(hub.client_count(), 0);

    assert_eq!(
        hub.broadcast_task_deleted("t1", "b1").unwrap(),
        RelayOutcome::HubStopped
    );

    // Idempotent.
    hub.shutdown().await;
}

#[tokio::test]
async fn test_ping_yields_exactly_one_pong() {
    let hub = hub();
    let (a, mut ra) = session(InterestFilter::new());
    hub.register(Arc::clone(&a)).await.unwrap();

    a.handle_text(r#"{"type":"ping"}"#);

    assert_eq!(recv_envelope(&mut ra).await.kind(), EventKind::Pong);
    assert!(ra.try_recv().is_err());

    hub.shutdown().await;
}

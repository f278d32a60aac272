//! End-to-end coordination tests
//!
//! These drive a full coordinator against a real transport and worker and
//! verify the guarantees the layer exists for: one execution per owner,
//! duplicates suppressed, phases persisted and rolled back, stale records
//! reconciled on restart.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;
use statestore::{FileBackend, KvStore};
use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use macrodaemon::config::Config;
use macrodaemon::coordinator::{CoordError, Coordinator, CoordinatorHandle, InlineMacroSource, MacroSource};
use macrodaemon::owner::{CallerContext, OwnerResolver, StaticDirectory};
use macrodaemon::state::{ExecutionPhase, PhaseMachine};
use macrodaemon::worker::{loopback_factory, spawn_ack_pump};
use macrodaemon::{
    Ack, BusError, ChannelTransport, ContextFactory, MacroId, MessageBus, MessageKind, OwnerId, WindowId,
};

// =============================================================================
// Test rig
// =============================================================================

fn fast_config() -> Config {
    let mut config = Config::default();
    config.bus.max_retries = 2;
    config.bus.backoff_ms = 10;
    config.bus.ack_timeout_ms = 250;
    config.guard.dedup_window_ms = 500;
    config
}

fn instant_source() -> Arc<dyn MacroSource> {
    Arc::new(InlineMacroSource {
        body: json!({"steps": []}),
        delay: None,
    })
}

fn slow_source(delay: Duration) -> Arc<dyn MacroSource> {
    Arc::new(InlineMacroSource {
        body: json!({"steps": []}),
        delay: Some(delay),
    })
}

fn ctx() -> CallerContext {
    CallerContext::default()
}

struct Rig {
    handle: CoordinatorHandle,
    task: JoinHandle<()>,
}

impl Rig {
    async fn shutdown(self) {
        self.handle.shutdown().await.ok();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("coordinator should shut down")
            .expect("coordinator task should not panic");
    }
}

fn spawn_coordinator(config: &Config, store: KvStore, source: Arc<dyn MacroSource>, bus: MessageBus) -> Rig {
    let resolver = OwnerResolver::new(store.clone(), Arc::new(StaticDirectory::default()));
    let machine = PhaseMachine::new(store, config.state.stale_after());
    let coordinator = Coordinator::new(config, bus, source, resolver, machine);
    let handle = coordinator.handle();
    let task = tokio::spawn(coordinator.run());
    Rig { handle, task }
}

/// Rig backed by the loopback worker, created on demand through its factory
fn loopback_rig(config: &Config, store: KvStore, source: Arc<dyn MacroSource>) -> Rig {
    let transport = Arc::new(ChannelTransport::new());
    let (ack_tx, ack_rx) = mpsc::channel(16);
    let factory = loopback_factory(transport.clone(), &config.worker, ack_tx);
    let bus = MessageBus::new(transport, config.bus.retry_policy(), factory);
    spawn_ack_pump(bus.clone(), ack_rx);
    spawn_coordinator(config, store, source, bus)
}

#[derive(Clone, Copy)]
enum AckMode {
    Ok,
    Reject,
    Never,
}

/// Rig backed by a pre-attached worker that records every envelope kind
fn recording_rig(
    config: &Config,
    store: KvStore,
    source: Arc<dyn MacroSource>,
    mode: AckMode,
) -> (Rig, Arc<Mutex<Vec<MessageKind>>>) {
    let transport = Arc::new(ChannelTransport::new());
    let mut rx = transport.attach(&config.worker.target, 16);
    let factory: ContextFactory = Arc::new(|| async { Ok(()) }.boxed());
    let bus = MessageBus::new(transport, config.bus.retry_policy(), factory);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let worker_bus = bus.clone();
    let worker_seen = seen.clone();
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            worker_seen.lock().unwrap().push(envelope.kind);
            if let Some(request_id) = envelope.request_id {
                match mode {
                    AckMode::Ok => {
                        worker_bus.deliver_ack(Ack::ok(request_id, json!(null)));
                    }
                    AckMode::Reject => {
                        worker_bus.deliver_ack(Ack::error(request_id, "engine refused"));
                    }
                    AckMode::Never => {}
                }
            }
        }
    });

    (spawn_coordinator(config, store, source, bus), seen)
}

// =============================================================================
// Start path
// =============================================================================

#[tokio::test]
async fn test_start_persists_playing_phase() {
    let config = fast_config();
    let rig = loopback_rig(&config, KvStore::in_memory(), instant_source());

    let owner = rig
        .handle
        .start(Some("owner-1".to_string()), MacroId::new("m"), json!({}), ctx())
        .await
        .expect("start should succeed");
    assert_eq!(owner, OwnerId::new("owner-1"));

    let snapshot = rig
        .handle
        .query_state(Some("owner-1".to_string()), ctx())
        .await
        .unwrap();
    assert_eq!(snapshot.phase, ExecutionPhase::Playing);
    assert_eq!(snapshot.meta, json!({"macro-id": "m"}));

    let metrics = rig.handle.metrics().await.unwrap();
    assert_eq!(metrics.starts_accepted, 1);

    rig.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_start_suppressed_within_window() {
    let config = fast_config();
    let rig = loopback_rig(&config, KvStore::in_memory(), instant_source());

    rig.handle
        .start(Some("owner-1".to_string()), MacroId::new("m"), json!({}), ctx())
        .await
        .expect("first start should succeed");

    // Identical request, right behind the first
    let second = rig
        .handle
        .start(Some("owner-1".to_string()), MacroId::new("m"), json!({}), ctx())
        .await;
    assert!(matches!(second, Err(ref e) if e.is_suppressed()), "got {second:?}");

    let metrics = rig.handle.metrics().await.unwrap();
    assert_eq!(metrics.starts_accepted, 1);
    assert_eq!(metrics.starts_suppressed, 1);

    rig.shutdown().await;
}

#[tokio::test]
async fn test_second_macro_rejected_while_first_in_flight() {
    let config = fast_config();
    let rig = loopback_rig(&config, KvStore::in_memory(), slow_source(Duration::from_millis(150)));

    let first = tokio::spawn({
        let handle = rig.handle.clone();
        async move {
            handle
                .start(Some("owner-1".to_string()), MacroId::new("m-1"), json!({}), ctx())
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Different macro id, so only the in-flight guard can reject it
    let second = rig
        .handle
        .start(Some("owner-1".to_string()), MacroId::new("m-2"), json!({}), ctx())
        .await;
    assert!(matches!(second, Err(ref e) if e.is_suppressed()), "got {second:?}");

    assert!(first.await.unwrap().is_ok(), "in-flight start must be unaffected");

    rig.shutdown().await;
}

#[tokio::test]
async fn test_starts_for_different_owners_are_independent() {
    let config = fast_config();
    let rig = loopback_rig(&config, KvStore::in_memory(), instant_source());

    rig.handle
        .start(Some("owner-a".to_string()), MacroId::new("m"), json!({}), ctx())
        .await
        .expect("owner-a start should succeed");
    rig.handle
        .start(Some("owner-b".to_string()), MacroId::new("m"), json!({}), ctx())
        .await
        .expect("owner-b start should succeed");

    let metrics = rig.handle.metrics().await.unwrap();
    assert_eq!(metrics.starts_accepted, 2);
    assert_eq!(metrics.starts_suppressed, 0);

    rig.shutdown().await;
}

// =============================================================================
// Stop-during-load race
// =============================================================================

#[tokio::test]
async fn test_stop_during_load_aborts_start_without_dispatch() {
    let config = fast_config();
    let (rig, seen) = recording_rig(
        &config,
        KvStore::in_memory(),
        slow_source(Duration::from_millis(300)),
        AckMode::Ok,
    );

    let start = tokio::spawn({
        let handle = rig.handle.clone();
        async move {
            handle
                .start(Some("owner-1".to_string()), MacroId::new("m"), json!({}), ctx())
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Stop lands while the load is still pending
    rig.handle
        .stop(Some("owner-1".to_string()), ctx())
        .await
        .expect("stop should succeed");

    let outcome = start.await.unwrap();
    assert!(matches!(outcome, Err(CoordError::Aborted { .. })), "got {outcome:?}");

    // The worker saw the stop but never a play for the aborted start
    let kinds = seen.lock().unwrap().clone();
    assert!(kinds.contains(&MessageKind::Stop));
    assert!(!kinds.contains(&MessageKind::Play), "aborted start must not dispatch");

    let snapshot = rig
        .handle
        .query_state(Some("owner-1".to_string()), ctx())
        .await
        .unwrap();
    assert_eq!(snapshot.phase, ExecutionPhase::Idle);

    let metrics = rig.handle.metrics().await.unwrap();
    assert_eq!(metrics.starts_aborted, 1);
    assert_eq!(metrics.stops, 1);

    rig.shutdown().await;
}

#[tokio::test]
async fn test_start_after_aborted_start_succeeds() {
    let config = fast_config();
    let rig = loopback_rig(&config, KvStore::in_memory(), slow_source(Duration::from_millis(200)));

    let first = tokio::spawn({
        let handle = rig.handle.clone();
        async move {
            handle
                .start(Some("owner-1".to_string()), MacroId::new("m-1"), json!({}), ctx())
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    rig.handle.stop(Some("owner-1".to_string()), ctx()).await.unwrap();
    assert!(matches!(first.await.unwrap(), Err(CoordError::Aborted { .. })));

    // A fresh start for a different macro is not blocked by the aborted one
    rig.handle
        .start(Some("owner-1".to_string()), MacroId::new("m-2"), json!({}), ctx())
        .await
        .expect("start after abort should succeed");

    rig.shutdown().await;
}

// =============================================================================
// Rollback on dispatch failure
// =============================================================================

#[tokio::test]
async fn test_worker_rejection_rolls_phase_back() {
    let config = fast_config();
    let (rig, _seen) = recording_rig(&config, KvStore::in_memory(), instant_source(), AckMode::Reject);

    let outcome = rig
        .handle
        .start(Some("owner-1".to_string()), MacroId::new("m"), json!({}), ctx())
        .await;
    assert!(matches!(outcome, Err(CoordError::Rejected(_))), "got {outcome:?}");

    let snapshot = rig
        .handle
        .query_state(Some("owner-1".to_string()), ctx())
        .await
        .unwrap();
    assert_eq!(snapshot.phase, ExecutionPhase::Idle, "failed dispatch must not leave playing");

    rig.shutdown().await;
}

#[tokio::test]
async fn test_ack_timeout_rolls_phase_back() {
    let config = fast_config();
    let (rig, _seen) = recording_rig(&config, KvStore::in_memory(), instant_source(), AckMode::Never);

    let outcome = rig
        .handle
        .start(Some("owner-1".to_string()), MacroId::new("m"), json!({}), ctx())
        .await;
    assert!(
        matches!(outcome, Err(CoordError::Bus(BusError::AckTimeout { .. }))),
        "got {outcome:?}"
    );

    let snapshot = rig
        .handle
        .query_state(Some("owner-1".to_string()), ctx())
        .await
        .unwrap();
    assert_eq!(snapshot.phase, ExecutionPhase::Idle);

    let metrics = rig.handle.metrics().await.unwrap();
    assert_eq!(metrics.ack_timeouts, 1);

    rig.shutdown().await;
}

// =============================================================================
// Pause / resume
// =============================================================================

#[tokio::test]
async fn test_pause_resume_cycle() {
    let config = fast_config();
    let rig = loopback_rig(&config, KvStore::in_memory(), instant_source());
    let owner = Some("owner-1".to_string());

    rig.handle
        .start(owner.clone(), MacroId::new("m"), json!({}), ctx())
        .await
        .unwrap();

    rig.handle.pause(owner.clone(), ctx()).await.expect("pause should succeed");
    let snapshot = rig.handle.query_state(owner.clone(), ctx()).await.unwrap();
    assert_eq!(snapshot.phase, ExecutionPhase::Paused);

    rig.handle.resume(owner.clone(), ctx()).await.expect("resume should succeed");
    let snapshot = rig.handle.query_state(owner.clone(), ctx()).await.unwrap();
    assert_eq!(snapshot.phase, ExecutionPhase::Playing);

    rig.handle.stop(owner.clone(), ctx()).await.unwrap();
    let snapshot = rig.handle.query_state(owner, ctx()).await.unwrap();
    assert_eq!(snapshot.phase, ExecutionPhase::Idle);

    rig.shutdown().await;
}

#[tokio::test]
async fn test_pause_while_idle_is_invalid() {
    let config = fast_config();
    let rig = loopback_rig(&config, KvStore::in_memory(), instant_source());

    let outcome = rig.handle.pause(Some("owner-1".to_string()), ctx()).await;
    assert!(matches!(outcome, Err(CoordError::State(_))), "got {outcome:?}");

    rig.shutdown().await;
}

// =============================================================================
// Edit lifecycle and owner mapping
// =============================================================================

#[tokio::test]
async fn test_edit_lifecycle_maps_window_to_owner() {
    let config = fast_config();
    let rig = loopback_rig(&config, KvStore::in_memory(), instant_source());
    let window = WindowId::new("editor-1");

    let owner = rig
        .handle
        .begin_edit(window.clone(), Some("owner-1".to_string()), ctx())
        .await
        .expect("begin_edit should succeed");
    assert_eq!(owner, OwnerId::new("owner-1"));

    // Requests carrying the window id resolve to the editing owner
    let snapshot = rig
        .handle
        .query_state(Some("editor-1".to_string()), ctx())
        .await
        .unwrap();
    assert_eq!(snapshot.phase, ExecutionPhase::Editing);

    let closed = rig.handle.end_edit(window.clone()).await.unwrap();
    assert_eq!(closed, Some(OwnerId::new("owner-1")));

    let snapshot = rig
        .handle
        .query_state(Some("owner-1".to_string()), ctx())
        .await
        .unwrap();
    assert_eq!(snapshot.phase, ExecutionPhase::Idle);

    // Mapping is gone with the window
    assert_eq!(rig.handle.window_closed(window).await.unwrap(), None);

    rig.shutdown().await;
}

#[tokio::test]
async fn test_ephemeral_window_mapping() {
    let config = fast_config();
    let rig = loopback_rig(&config, KvStore::in_memory(), instant_source());

    rig.handle
        .window_opened(WindowId::new("panel-1"), OwnerId::new("owner-1"))
        .await
        .unwrap();

    rig.handle
        .start(Some("panel-1".to_string()), MacroId::new("m"), json!({}), ctx())
        .await
        .expect("start through a mapped window should succeed");

    let snapshot = rig
        .handle
        .query_state(Some("owner-1".to_string()), ctx())
        .await
        .unwrap();
    assert_eq!(snapshot.phase, ExecutionPhase::Playing, "phase belongs to the mapped owner");

    let closed = rig.handle.window_closed(WindowId::new("panel-1")).await.unwrap();
    assert_eq!(closed, Some(OwnerId::new("owner-1")));

    rig.shutdown().await;
}

// =============================================================================
// Restart reconciliation
// =============================================================================

#[tokio::test]
async fn test_restart_resets_stale_phase_and_mappings() {
    let config = fast_config();
    let temp = tempdir().unwrap();
    let path = temp.path().join("state.json");

    // File-backed store, so the second instance reads what the first wrote
    // rather than sharing a handle
    let first = loopback_rig(&config, KvStore::new(Arc::new(FileBackend::new(&path))), instant_source());
    first
        .handle
        .start(Some("owner-1".to_string()), MacroId::new("m"), json!({}), ctx())
        .await
        .unwrap();
    first
        .handle
        .window_opened(WindowId::new("panel-1"), OwnerId::new("owner-1"))
        .await
        .unwrap();
    first.shutdown().await;

    // The playing record now predates the next coordinator instance
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = loopback_rig(&config, KvStore::new(Arc::new(FileBackend::new(&path))), instant_source());
    let snapshot = second
        .handle
        .query_state(Some("owner-1".to_string()), ctx())
        .await
        .unwrap();
    assert_eq!(snapshot.phase, ExecutionPhase::Idle, "stale playing phase must reset");

    let metrics = second.handle.metrics().await.unwrap();
    assert_eq!(metrics.hydrate_resets, 1);

    // The stale owner's window mappings were swept with it
    assert_eq!(second.handle.window_closed(WindowId::new("panel-1")).await.unwrap(), None);

    second.shutdown().await;
}

// =============================================================================
// Owner resolution fallbacks
// =============================================================================

#[tokio::test]
async fn test_no_owner_when_no_container_exists() {
    let config = fast_config();
    let rig = loopback_rig(&config, KvStore::in_memory(), instant_source());

    // No candidate, no origin, and the directory is empty
    let outcome = rig.handle.start(None, MacroId::new("m"), json!({}), ctx()).await;
    assert!(matches!(outcome, Err(CoordError::NoOwner)), "got {outcome:?}");

    rig.shutdown().await;
}

#[tokio::test]
async fn test_origin_owner_fallback() {
    let config = fast_config();
    let rig = loopback_rig(&config, KvStore::in_memory(), instant_source());

    let ctx = CallerContext {
        origin_owner: Some(OwnerId::new("origin-owner")),
        tab_id: Some(7),
    };
    let owner = rig
        .handle
        .start(None, MacroId::new("m"), json!({}), ctx)
        .await
        .expect("start should resolve through the caller origin");
    assert_eq!(owner, OwnerId::new("origin-owner"));

    rig.shutdown().await;
}

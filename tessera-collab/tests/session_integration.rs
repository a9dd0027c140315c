//! Session integration tests over an in-process hub.
//!
//! Every session shares one `MemoryStore` (durable) and one `Hub`
//! (realtime), the same topology as several browser tabs on one project.

use std::sync::Arc;
use std::time::Duration;

use tessera_collab::{
    ConnectionState, Hub, HubConfig, HubConnection, MemoryStore, Namespace, RealtimeChannel,
    SessionConfig, SessionController, SessionEvent, SyncError,
};
use tessera_core::{Aabb, Command, Selector, Shape, ShapePatch, ShapeSpec, ShapeType, UpdateMode};
use tokio::time::timeout;

type Session = SessionController<MemoryStore, HubConnection>;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn rect(id: &str, x: f64, y: f64) -> Shape {
    let mut shape = Shape::with_defaults(ShapeType::Rectangle, id, "seed", 0);
    shape.apply_patch(&ShapePatch::position(x, y));
    shape
}

fn x_of(shape: &Shape) -> f64 {
    shape.as_patch().x.unwrap()
}

fn move_x(x: f64) -> ShapePatch {
    ShapePatch {
        x: Some(x),
        ..ShapePatch::default()
    }
}

async fn start(store: &MemoryStore, hub: &Arc<Hub>, user: &str) -> Session {
    start_with(SessionConfig::for_testing(), store, hub, user).await
}

async fn start_with(
    config: SessionConfig,
    store: &MemoryStore,
    hub: &Arc<Hub>,
    user: &str,
) -> Session {
    let conn = Arc::new(hub.connect().await);
    SessionController::start(config, Arc::new(store.clone()), conn, user, &user.to_uppercase())
        .await
        .unwrap()
}

/// Handle events until the session has been idle for a while.
async fn settle(session: &mut Session) {
    while let Ok(event) = timeout(Duration::from_millis(80), session.next_event()).await {
        event.unwrap();
    }
}

// ─── End-to-end scenarios ────────────────────────────────────────────────────

#[tokio::test]
async fn test_lock_blocks_concurrent_update() {
    let store = MemoryStore::with_shapes([rect("S", 0.0, 0.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut a = start(&store, &hub, "alice").await;
    let mut b = start(&store, &hub, "bob").await;
    settle(&mut a).await;
    settle(&mut b).await;

    assert!(a.lock("S").await.unwrap());
    assert!(a.commit_update("S", move_x(150.0)).await.unwrap());
    settle(&mut b).await;

    assert!(!b.lock("S").await.unwrap());
    assert!(!b.commit_update("S", move_x(999.0)).await.unwrap());

    assert_eq!(x_of(&store.get("S").unwrap()), 150.0);
    let seen_by_b = b.store().get("S").unwrap();
    assert_eq!(x_of(seen_by_b), 150.0);
    assert_eq!(seen_by_b.locked_by.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_startup_sweeps_stale_locks() {
    let mut stale = rect("S", 10.0, 10.0);
    stale.locked_by = Some("stale-user".into());
    let store = MemoryStore::with_shapes([stale]);
    let hub = Hub::new(HubConfig::for_testing());

    let session = start(&store, &hub, "alice").await;

    assert_eq!(session.report().swept, 1);
    assert!(session.store().get("S").unwrap().locked_by.is_none());
    assert!(store.get("S").unwrap().locked_by.is_none());
    let broadcast = hub.records(Namespace::Shapes).await;
    assert!(broadcast["S"]["lockedBy"].is_null());
}

#[tokio::test]
async fn test_marquee_conflict_locks_nothing() {
    let store = MemoryStore::with_shapes([
        rect("s1", 10.0, 10.0),
        rect("s2", 200.0, 10.0),
        rect("s3", 400.0, 10.0),
    ]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut other = start(&store, &hub, "other").await;
    let mut me = start(&store, &hub, "me").await;
    settle(&mut other).await;
    assert!(other.lock("s3").await.unwrap());
    settle(&mut me).await;

    let err = me
        .select_in_box(Aabb::from_rect(0.0, 0.0, 1000.0, 500.0))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Selection(_)));

    assert!(me.selection().is_empty());
    assert!(me.store().locked_by("me").is_empty());
    for id in ["s1", "s2"] {
        assert!(store.get(id).unwrap().locked_by.is_none());
    }
    assert_eq!(store.get("s3").unwrap().locked_by.as_deref(), Some("other"));
}

#[tokio::test]
async fn test_marquee_batch_locks_every_hit() {
    let store = MemoryStore::with_shapes([
        rect("s1", 10.0, 10.0),
        rect("s2", 200.0, 10.0),
        rect("far", 3000.0, 3000.0),
    ]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut me = start(&store, &hub, "me").await;
    settle(&mut me).await;

    let mut hits = me
        .select_in_box(Aabb::from_rect(0.0, 0.0, 1000.0, 500.0))
        .await
        .unwrap();
    hits.sort_unstable();
    assert_eq!(hits, ["s1", "s2"]);
    assert_eq!(me.selection().len(), 2);

    let broadcast = hub.records(Namespace::Shapes).await;
    for id in ["s1", "s2"] {
        assert_eq!(store.get(id).unwrap().locked_by.as_deref(), Some("me"));
        assert_eq!(broadcast[id]["lockedBy"], "me");
        assert_eq!(me.store().get(id).unwrap().locked_by.as_deref(), Some("me"));
    }
    assert!(store.get("far").unwrap().locked_by.is_none());
    assert!(broadcast["far"]["lockedBy"].is_null());
}

#[tokio::test]
async fn test_undo_with_empty_history() {
    let store = MemoryStore::new();
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;

    assert!(!session.undo().await.unwrap());
    assert_eq!(session.history().past_len(), 0);
    assert_eq!(session.history().future_len(), 0);
    assert!(session.history().present().is_some());
}

// ─── Writes and rollback ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_durable_write_rolls_back() {
    let store = MemoryStore::with_shapes([rect("S", 5.0, 5.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;
    settle(&mut session).await;

    store.set_fail_writes(true);
    let err = session.commit_update("S", move_x(80.0)).await.unwrap_err();
    assert!(err.is_partial_write());

    assert_eq!(x_of(session.store().get("S").unwrap()), 5.0);
    assert_eq!(session.history().past_len(), 0);
    assert_eq!(x_of(&store.get("S").unwrap()), 5.0);
}

#[tokio::test]
async fn test_failed_create_leaves_no_shape() {
    let store = MemoryStore::new();
    let hub = Hub::new(HubConfig::for_testing());
    let conn = Arc::new(hub.connect().await);
    let mut session = SessionController::start(
        SessionConfig::for_testing(),
        Arc::new(store.clone()),
        conn.clone(),
        "alice",
        "Alice",
    )
    .await
    .unwrap();

    conn.set_fail_writes(true);
    store.set_fail_writes(true);
    let err = session
        .create_shape(ShapeSpec::new(ShapeType::Circle))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Write { durable: Some(_), broadcast: Some(_) }));
    assert!(!err.is_partial_write());
    assert!(session.store().is_empty());
    assert!(store.records().is_empty());
}

#[tokio::test]
async fn test_start_fails_without_durable_store() {
    let store = MemoryStore::with_shapes([rect("S", 0.0, 0.0)]);
    store.set_fail_loads(true);
    let hub = Hub::new(HubConfig::for_testing());
    let conn = Arc::new(hub.connect().await);

    let result = SessionController::start(
        SessionConfig::for_testing(),
        Arc::new(store),
        conn,
        "alice",
        "Alice",
    )
    .await;
    assert!(result.is_err());
    assert!(hub.records(Namespace::Presence).await.is_empty());
}

// ─── Gestures, debouncing and history ────────────────────────────────────────

#[tokio::test]
async fn test_preview_frames_debounce_durable_writes() {
    let store = MemoryStore::with_shapes([rect("S", 0.0, 0.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;
    settle(&mut session).await;
    session.lock("S").await.unwrap();

    for x in [10.0, 20.0, 30.0] {
        assert!(session.preview_update("S", move_x(x)).await.unwrap());
    }
    assert_eq!(hub.records(Namespace::Shapes).await["S"]["x"], 30.0);
    assert_eq!(x_of(&store.get("S").unwrap()), 0.0);

    let flushed = loop {
        match session.next_event().await.unwrap() {
            SessionEvent::DurableFlushed(ids) => break ids,
            _ => continue,
        }
    };
    assert_eq!(flushed, vec!["S".to_string()]);
    assert_eq!(x_of(&store.get("S").unwrap()), 30.0);
    assert_eq!(session.history().past_len(), 0);
}

#[tokio::test]
async fn test_commit_merges_pending_preview() {
    let store = MemoryStore::with_shapes([rect("S", 0.0, 0.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;
    session.lock("S").await.unwrap();

    let drag = ShapePatch {
        width: Some(300.0),
        ..ShapePatch::default()
    };
    session.preview_update("S", drag).await.unwrap();
    session.commit_update("S", move_x(42.0)).await.unwrap();

    let durable = store.get("S").unwrap();
    assert_eq!(durable.as_patch().width, Some(300.0));
    assert_eq!(x_of(&durable), 42.0);
    assert_eq!(session.history().past_len(), 1);
}

#[tokio::test]
async fn test_unlock_is_coalesced() {
    let store = MemoryStore::with_shapes([rect("S", 0.0, 0.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;
    settle(&mut session).await;

    session.lock("S").await.unwrap();
    session.unlock("S");
    assert!(session.has_pending_unlock("S"));
    // Re-locking inside the window keeps the lock without a write.
    assert!(session.lock("S").await.unwrap());
    assert!(!session.has_pending_unlock("S"));

    session.unlock("S");
    let released = loop {
        match session.next_event().await.unwrap() {
            SessionEvent::UnlocksFlushed(ids) => break ids,
            _ => continue,
        }
    };
    assert_eq!(released, vec!["S".to_string()]);
    assert!(store.get("S").unwrap().locked_by.is_none());
}

#[tokio::test]
async fn test_create_undo_redo_round_trip() {
    let store = MemoryStore::new();
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;

    let id = session
        .create_shape(ShapeSpec::new(ShapeType::Rectangle))
        .await
        .unwrap();
    assert!(store.get(&id).is_some());

    assert!(session.undo().await.unwrap());
    assert!(store.get(&id).is_none());
    assert!(!hub.records(Namespace::Shapes).await.contains_key(&id));
    assert!(session.history().can_redo());

    assert!(session.redo().await.unwrap());
    assert!(store.get(&id).is_some());
    assert!(session.store().contains(&id));
}

#[tokio::test]
async fn test_undo_leaves_foreign_locks_alone() {
    let store = MemoryStore::with_shapes([rect("S", 0.0, 0.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut alice = start(&store, &hub, "alice").await;
    let mut bob = start(&store, &hub, "bob").await;
    settle(&mut alice).await;

    alice.nudge(&["S".to_string()], 50.0, 0.0).await.unwrap();
    settle(&mut bob).await;
    assert!(bob.lock("S").await.unwrap());
    settle(&mut alice).await;

    assert!(alice.undo().await.unwrap());
    let shape = store.get("S").unwrap();
    assert_eq!(x_of(&shape), 50.0);
    assert_eq!(shape.locked_by.as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_undo_and_redo_clear_selection() {
    let store = MemoryStore::with_shapes([rect("s1", 10.0, 10.0), rect("s2", 200.0, 10.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;
    settle(&mut session).await;

    let hits = session
        .select_in_box(Aabb::from_rect(0.0, 0.0, 1000.0, 500.0))
        .await
        .unwrap();
    session.nudge(&hits, 25.0, 0.0).await.unwrap();
    assert_eq!(x_of(&store.get("s1").unwrap()), 35.0);

    assert!(session.undo().await.unwrap());
    assert!(session.selection().is_empty());
    assert_eq!(x_of(&store.get("s1").unwrap()), 10.0);
    settle(&mut session).await;
    for id in ["s1", "s2"] {
        assert!(store.get(id).unwrap().locked_by.is_none());
    }

    session
        .select_in_box(Aabb::from_rect(0.0, 0.0, 1000.0, 500.0))
        .await
        .unwrap();
    assert!(session.redo().await.unwrap());
    assert!(session.selection().is_empty());
    assert_eq!(x_of(&store.get("s1").unwrap()), 35.0);
}

#[tokio::test]
async fn test_failed_undo_keeps_selection() {
    let store = MemoryStore::with_shapes([rect("s1", 10.0, 10.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;
    settle(&mut session).await;

    let hits = session
        .select_in_box(Aabb::from_rect(0.0, 0.0, 100.0, 100.0))
        .await
        .unwrap();
    session.nudge(&hits, 5.0, 0.0).await.unwrap();

    store.set_fail_writes(true);
    assert!(session.undo().await.is_err());
    assert_eq!(session.selection(), ["s1"]);
}

#[tokio::test]
async fn test_undo_restores_failure_moves_history_back() {
    let store = MemoryStore::new();
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;
    session.create_shape(ShapeSpec::new(ShapeType::Line)).await.unwrap();

    store.set_fail_writes(true);
    assert!(session.undo().await.is_err());
    assert_eq!(session.history().past_len(), 1);
    assert!(!session.history().can_redo());
    assert_eq!(session.store().len(), 1);
}

#[tokio::test]
async fn test_duplicate_offsets_and_stacks() {
    let store = MemoryStore::with_shapes([rect("S", 10.0, 10.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;
    session.lock("S").await.unwrap();

    let copies = session.duplicate(&["S".to_string()]).await.unwrap();
    assert_eq!(copies.len(), 1);
    let copy = store.get(&copies[0]).unwrap();
    assert_ne!(copy.id, "S");
    assert_eq!(x_of(&copy), 30.0);
    assert_eq!(copy.as_patch().y, Some(30.0));
    assert!(copy.locked_by.is_none());
    assert_eq!(copy.created_by, "alice");
    assert!(copy.z_index > store.get("S").unwrap().z_index);
}

#[tokio::test]
async fn test_commands_are_one_history_entry() {
    let store = MemoryStore::with_shapes([rect("a", 0.0, 0.0), rect("b", 0.0, 0.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;

    let commands = [
        Command::Update {
            target: Selector::Id { id: "a".into() },
            mode: UpdateMode::Relative,
            patch: move_x(5.0),
        },
        Command::Delete {
            target: Selector::Id { id: "b".into() },
        },
    ];
    assert_eq!(session.apply_commands(&commands).await.unwrap(), 2);
    assert_eq!(session.history().past_len(), 1);
    assert_eq!(x_of(&store.get("a").unwrap()), 5.0);
    assert!(store.get("b").is_none());

    session.undo().await.unwrap();
    assert_eq!(store.records().len(), 2);
}

#[tokio::test]
async fn test_delete_skips_shapes_locked_by_others() {
    let store = MemoryStore::with_shapes([rect("mine", 0.0, 0.0), rect("theirs", 0.0, 0.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut alice = start(&store, &hub, "alice").await;
    let mut bob = start(&store, &hub, "bob").await;
    settle(&mut bob).await;
    bob.lock("theirs").await.unwrap();
    settle(&mut alice).await;

    let deleted = alice
        .delete_shapes(&["mine".to_string(), "theirs".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(store.get("theirs").is_some());
    assert!(store.get("mine").is_none());
}

// ─── Presence and teardown ───────────────────────────────────────────────────

#[tokio::test]
async fn test_sessions_get_distinct_colors() {
    let store = MemoryStore::new();
    let hub = Hub::new(HubConfig::for_testing());
    let alice = start(&store, &hub, "alice").await;
    let bob = start(&store, &hub, "bob").await;
    assert_ne!(alice.color(), bob.color());

    let online = bob.online_users().await.unwrap().current();
    let mut ids: Vec<&str> = online.iter().map(|u| u.user_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["alice", "bob"]);
}

#[tokio::test]
async fn test_cursor_is_rate_limited_and_visible() {
    let store = MemoryStore::new();
    let hub = Hub::new(HubConfig::for_testing());
    let mut alice = start(&store, &hub, "alice").await;
    let bob = start(&store, &hub, "bob").await;

    assert!(alice.update_cursor(1.0, 2.0).await.unwrap());
    assert!(!alice.update_cursor(3.0, 4.0).await.unwrap());

    let cursors = bob.cursors().await.unwrap();
    assert_eq!(cursors.len(), 1);
    assert_eq!(cursors[0].0, "alice");
    assert_eq!(cursors[0].1.x, 1.0);
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let store = MemoryStore::with_shapes([rect("a", 0.0, 0.0), rect("b", 0.0, 0.0)]);
    let hub = Hub::new(HubConfig::for_testing());
    let mut session = start(&store, &hub, "alice").await;
    session.lock("a").await.unwrap();
    session.lock("b").await.unwrap();
    session.unlock("b");
    session.preview_update("a", move_x(64.0)).await.unwrap();
    session.update_cursor(5.0, 5.0).await.unwrap();

    session.shutdown().await.unwrap();

    assert!(store.records().values().all(|s| s.locked_by.is_none()));
    assert_eq!(x_of(&store.get("a").unwrap()), 64.0);
    assert!(hub.records(Namespace::Presence).await.is_empty());
    assert!(hub.records(Namespace::Cursors).await.is_empty());
}

#[tokio::test]
async fn test_presence_rearmed_after_lease_expiry() {
    let store = MemoryStore::new();
    let hub = Hub::new(HubConfig::for_testing());
    let _reaper = hub.spawn_reaper();
    let config = SessionConfig {
        heartbeat_interval: Duration::from_millis(400),
        ..SessionConfig::for_testing()
    };
    let mut session = start_with(config, &store, &hub, "alice").await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(hub.records(Namespace::Presence).await.is_empty());

    let reconnected = timeout(Duration::from_secs(2), async {
        loop {
            if session.next_event().await.unwrap() == SessionEvent::Reconnected {
                break;
            }
        }
    })
    .await;
    assert!(reconnected.is_ok());
    assert!(hub.records(Namespace::Presence).await.contains_key("alice"));
    assert!(hub.stats().await.expired_leases >= 1);
}

#[tokio::test]
async fn test_closed_connection_reports_lost() {
    let store = MemoryStore::new();
    let hub = Hub::new(HubConfig::for_testing());
    let conn = Arc::new(hub.connect().await);
    let mut session = SessionController::start(
        SessionConfig::for_testing(),
        Arc::new(store),
        conn.clone(),
        "alice",
        "Alice",
    )
    .await
    .unwrap();
    settle(&mut session).await;

    conn.close().await;
    assert_eq!(
        session.next_event().await.unwrap(),
        SessionEvent::ConnectionLost(ConnectionState::Disconnected)
    );
    assert!(hub.records(Namespace::Presence).await.is_empty());
    assert_eq!(*conn.connection_state().borrow(), ConnectionState::Disconnected);
}

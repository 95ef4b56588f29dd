use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::models::CollabError;
use crate::services::change_tracker::ChangeTracker;
use crate::services::snapshot_service::SnapshotService;
use crate::ws::connctx::{ConnCtx, ConnId};
use crate::ws::room::{ChangeEvent, Room};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: usize,
    pub connections: usize,
}

/// All rooms currently held in memory, keyed by room id.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    tracker: Arc<ChangeTracker>,
    snapshots: Arc<SnapshotService>,
    next_conn_id: AtomicU64,
}

impl RoomRegistry {
    pub fn new(tracker: Arc<ChangeTracker>, snapshots: Arc<SnapshotService>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            tracker,
            snapshots,
            next_conn_id: AtomicU64::new(1),
        }
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, Arc<Room>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The room for `room_id`, created together with its change pipeline on
    /// first use.
    pub fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        let mut rooms = self.rooms();
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let room = Arc::new(Room::new(room_id, tx));
        rooms.insert(room_id.to_string(), room.clone());
        tokio::spawn(run_change_pipeline(
            room_id.to_string(),
            Arc::downgrade(&room),
            rx,
            self.tracker.clone(),
            self.snapshots.clone(),
        ));
        info!("Created room {}", room_id);
        room
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms().get(room_id).cloned()
    }

    /// Tear a connection out of its room. Safe to call more than once.
    pub async fn remove(&self, ctx: &ConnCtx) -> bool {
        let Some(room) = self.get(&ctx.room_id) else {
            return false;
        };
        let removed = room.leave(ctx.conn_id).await.is_some();
        if removed {
            info!("Connection {} of user {} left room {}", ctx.conn_id, ctx.user_id, ctx.room_id);
        }
        removed
    }

    pub async fn stats(&self) -> RegistryStats {
        let rooms: Vec<Arc<Room>> = self.rooms().values().cloned().collect();
        let mut stats = RegistryStats {
            rooms: rooms.len(),
            connections: 0,
        };
        for room in rooms {
            stats.connections += room.connection_count().await;
        }
        stats
    }

    /// Unload rooms without connections that were idle for at least `ttl`.
    /// Pending changes are materialized first, attributed to `system_user`.
    pub async fn evict_idle(&self, ttl: Duration, system_user: &str) -> usize {
        let candidates: Vec<Arc<Room>> = self
            .rooms()
            .values()
            .filter(|room| room.idle_for() >= ttl)
            .cloned()
            .collect();

        let mut evicted = 0;
        for room in candidates {
            if room.connection_count().await > 0 || room.pending_changes() > 0 {
                continue;
            }

            // Changes of a room without a document record can never be saved.
            let mut unsaveable = false;
            if self.tracker.has_pending(room.room_id()) {
                match self
                    .snapshots
                    .materialize(&room, system_user, Some("Automatic snapshot before unloading".to_string()))
                    .await
                {
                    Ok(receipt) => debug!("Saved room {} as version {} before unloading", room.room_id(), receipt.version),
                    Err(CollabError::NotFound(_)) => {
                        warn!("Room {} has no document record, unloading without saving", room.room_id());
                        unsaveable = true;
                    }
                    Err(e) => {
                        warn!("Keeping room {} loaded, snapshot failed: {}", room.room_id(), e);
                        continue;
                    }
                }
            }

            let unloaded = {
                let mut rooms = self.rooms();
                let current = rooms
                    .get(room.room_id())
                    .map(|r| Arc::ptr_eq(r, &room))
                    .unwrap_or(false);
                // A join, edit and leave may have happened while the snapshot was written.
                if current && room.try_evict(ttl, || !unsaveable && self.tracker.has_pending(room.room_id())) {
                    rooms.remove(room.room_id());
                    true
                } else {
                    false
                }
            };

            if unloaded {
                self.tracker.forget(room.room_id());
                self.snapshots.forget_room(room.room_id());
                info!("Unloaded idle room {}", room.room_id());
                evicted += 1;
            }
        }
        evicted
    }
}

/// Periodically unload idle rooms.
pub fn spawn_sweeper(registry: Arc<RoomRegistry>, ttl: Duration, system_user: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = registry.evict_idle(ttl, &system_user).await;
            if evicted > 0 {
                info!("Room sweeper unloaded {} rooms", evicted);
            }
        }
    })
}

/// Feeds change events of one room into the tracker and triggers
/// materialization when a threshold is crossed. Ends with the room.
async fn run_change_pipeline(
    room_id: String,
    room: Weak<Room>,
    mut rx: mpsc::UnboundedReceiver<ChangeEvent>,
    tracker: Arc<ChangeTracker>,
    snapshots: Arc<SnapshotService>,
) {
    while let Some(event) = rx.recv().await {
        let Some(room) = room.upgrade() else {
            break;
        };

        tracker.record_change(&room_id, &event.user_id, event.magnitude);
        if tracker.should_materialize(&room_id) {
            if let Err(e) = snapshots.materialize(&room, &event.user_id, None).await {
                warn!("Automatic snapshot of room {} failed, retrying later: {}", room_id, e);
            }
        }
        room.change_processed();
    }
    debug!("Change pipeline of room {} stopped", room_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memcolab::MemColab;
    use crate::models::{CollabMessage, NewSnapshot, SyncMessage};
    use crate::services::ports::DocumentStore;
    use crate::services::change_tracker::SnapshotThresholds;
    use crate::services::change_tracker::tests::MapDirectory;
    use crate::ws::connctx::ConnHandle;
    use async_trait::async_trait;
    use loro::{ExportMode, LoroDoc};

    /// Memory store whose snapshot writes take a while.
    struct SlowStore(Arc<MemColab>);

    #[async_trait]
    impl DocumentStore for SlowStore {
        async fn load_document_state(&self, room_id: &str) -> Result<Option<Vec<u8>>, CollabError> {
            self.0.load_document_state(room_id).await
        }
        async fn current_version(&self, room_id: &str) -> Result<Option<u32>, CollabError> {
            self.0.current_version(room_id).await
        }
        async fn persist_snapshot(&self, room_id: &str, snapshot: &NewSnapshot) -> Result<(), CollabError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.0.persist_snapshot(room_id, snapshot).await
        }
    }

    fn registry(store: Arc<dyn DocumentStore>, change_threshold: u64) -> (RoomRegistry, Arc<ChangeTracker>) {
        let thresholds = SnapshotThresholds {
            change_threshold,
            ..SnapshotThresholds::default()
        };
        let tracker = Arc::new(ChangeTracker::new(thresholds, Arc::new(MapDirectory(HashMap::new()))));
        let snapshots = Arc::new(SnapshotService::new(store, tracker.clone()));
        (RoomRegistry::new(tracker.clone(), snapshots), tracker)
    }

    fn ctx(conn_id: ConnId, room_id: &str) -> ConnCtx {
        user_ctx(conn_id, room_id, "u1")
    }

    fn user_ctx(conn_id: ConnId, room_id: &str, user_id: &str) -> ConnCtx {
        ConnCtx {
            conn_id,
            user_id: user_id.into(),
            firm_id: "acme".into(),
            room_id: room_id.into(),
        }
    }

    fn edit(text: &str) -> Vec<u8> {
        let doc = LoroDoc::new();
        doc.get_text("content").insert(0, text).unwrap();
        doc.commit();
        doc.export(ExportMode::all_updates()).unwrap()
    }

    async fn wait_until_processed(room: &Room) {
        for _ in 0..100 {
            if room.pending_changes() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("change pipeline did not catch up");
    }

    #[tokio::test]
    async fn same_id_same_room() {
        let (registry, _) = registry(Arc::new(MemColab::new()), 100);
        let a = registry.get_or_create("draft-1");
        let b = registry.get_or_create("draft-1");
        let c = registry.get_or_create("draft-2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.stats().await, RegistryStats { rooms: 2, connections: 0 });
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (registry, _) = registry(Arc::new(MemColab::new()), 100);
        let room = registry.get_or_create("draft-1");
        let (tx, _rx) = mpsc::channel(8);
        let ctx = ctx(registry.next_conn_id(), "draft-1");
        assert!(room.join(ConnHandle::new(ctx.clone(), tx)).await);
        assert_eq!(registry.stats().await.connections, 1);

        assert!(registry.remove(&ctx).await);
        assert!(!registry.remove(&ctx).await);
        assert_eq!(registry.stats().await.connections, 0);
    }

    #[tokio::test]
    async fn crossing_the_threshold_materializes() {
        let store = Arc::new(MemColab::new());
        store.insert_document("draft-1", 0);
        let (registry, tracker) = registry(store.clone(), 1);
        let room = registry.get_or_create("draft-1");
        let (tx, _rx) = mpsc::channel(8);
        let ctx = ctx(registry.next_conn_id(), "draft-1");
        room.join(ConnHandle::new(ctx.clone(), tx)).await;

        room.receive(&ctx, CollabMessage::Sync(SyncMessage::Update(edit("saved"))))
            .await
            .unwrap();
        wait_until_processed(&room).await;

        assert_eq!(store.current_version_of("draft-1"), Some(1));
        let versions = store.versions("draft-1");
        assert_eq!(versions[0].contributors[0].user_id, "u1");
        assert_eq!(versions[0].created_by, "u1");
        assert!(!tracker.has_pending("draft-1"));
    }

    #[tokio::test]
    async fn idle_room_is_saved_then_unloaded() {
        let store = Arc::new(MemColab::new());
        store.insert_document("draft-1", 4);
        let (registry, tracker) = registry(store.clone(), 1_000);
        let room = registry.get_or_create("draft-1");
        let (tx, _rx) = mpsc::channel(8);
        let ctx = ctx(registry.next_conn_id(), "draft-1");
        room.join(ConnHandle::new(ctx.clone(), tx)).await;
        room.receive(&ctx, CollabMessage::Sync(SyncMessage::Update(edit("late"))))
            .await
            .unwrap();
        wait_until_processed(&room).await;

        // still connected
        assert_eq!(registry.evict_idle(Duration::ZERO, "s/colabri-sync").await, 0);

        registry.remove(&ctx).await;
        assert_eq!(registry.evict_idle(Duration::ZERO, "s/colabri-sync").await, 1);
        assert!(registry.get("draft-1").is_none());
        assert_eq!(store.current_version_of("draft-1"), Some(5));
        assert_eq!(store.versions("draft-1")[0].created_by, "s/colabri-sync");
        assert!(tracker.state("draft-1").is_none());

        let (tx, _rx) = mpsc::channel(8);
        assert!(!room.join(ConnHandle::new(ctx, tx)).await);
    }

    #[tokio::test]
    async fn recently_active_rooms_stay() {
        let (registry, _) = registry(Arc::new(MemColab::new()), 100);
        registry.get_or_create("draft-1");
        assert_eq!(registry.evict_idle(Duration::from_secs(3600), "s/colabri-sync").await, 0);
        assert!(registry.get("draft-1").is_some());
    }

    #[tokio::test]
    async fn room_without_record_is_unloaded_unsaved() {
        let store = Arc::new(MemColab::new());
        let (registry, tracker) = registry(store.clone(), 1_000);
        let room = registry.get_or_create("ghost");
        let (tx, _rx) = mpsc::channel(8);
        let ctx = ctx(registry.next_conn_id(), "ghost");
        room.join(ConnHandle::new(ctx.clone(), tx)).await;
        room.receive(&ctx, CollabMessage::Sync(SyncMessage::Update(edit("boo"))))
            .await
            .unwrap();
        wait_until_processed(&room).await;
        registry.remove(&ctx).await;

        assert_eq!(registry.evict_idle(Duration::ZERO, "s/colabri-sync").await, 1);
        assert!(registry.get("ghost").is_none());
        assert!(store.versions("ghost").is_empty());
        assert!(tracker.state("ghost").is_none());
    }

    #[tokio::test]
    async fn edit_during_eviction_snapshot_keeps_the_room() {
        let mem = Arc::new(MemColab::new());
        mem.insert_document("draft-1", 0);
        let (registry, tracker) = registry(Arc::new(SlowStore(mem.clone())), 1_000);
        let registry = Arc::new(registry);

        let room = registry.get_or_create("draft-1");
        let first = user_ctx(registry.next_conn_id(), "draft-1", "u1");
        let (tx, _rx1) = mpsc::channel(8);
        room.join(ConnHandle::new(first.clone(), tx)).await;
        room.receive(&first, CollabMessage::Sync(SyncMessage::Update(edit("first"))))
            .await
            .unwrap();
        wait_until_processed(&room).await;
        registry.remove(&first).await;

        let sweeper = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.evict_idle(Duration::ZERO, "s/colabri-sync").await })
        };
        // the snapshot write is now in flight
        tokio::time::sleep(Duration::from_millis(50)).await;

        let again = registry.get_or_create("draft-1");
        assert!(Arc::ptr_eq(&room, &again));
        let second = user_ctx(registry.next_conn_id(), "draft-1", "u2");
        let (tx, _rx2) = mpsc::channel(8);
        assert!(again.join(ConnHandle::new(second.clone(), tx)).await);
        again
            .receive(&second, CollabMessage::Sync(SyncMessage::Update(edit("second"))))
            .await
            .unwrap();
        wait_until_processed(&again).await;
        registry.remove(&second).await;

        assert_eq!(sweeper.await.unwrap(), 0);
        assert!(registry.get("draft-1").is_some());
        assert!(tracker.state("draft-1").unwrap().contributors.contains_key("u2"));
        assert_eq!(mem.versions("draft-1").len(), 1);

        // the next sweep saves the late edit before unloading
        assert_eq!(registry.evict_idle(Duration::ZERO, "s/colabri-sync").await, 1);
        let versions = mem.versions("draft-1");
        assert_eq!(versions.len(), 2);
        let latest = versions.iter().max_by_key(|v| v.version).unwrap();
        assert!(latest.plain_text.contains("second"));
        assert_eq!(latest.contributors[0].user_id, "u2");
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::models::{CollabError, NewSnapshot, SnapshotPackage, SnapshotReceipt};
use crate::services::change_tracker::ChangeTracker;
use crate::services::ports::DocumentStore;
use crate::ws::room::Room;

/// Folds a room's live document and its tracked contributors into a new
/// persisted version.
pub struct SnapshotService {
    store: Arc<dyn DocumentStore>,
    tracker: Arc<ChangeTracker>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SnapshotService {
    pub fn new(store: Arc<dyn DocumentStore>, tracker: Arc<ChangeTracker>) -> Self {
        Self {
            store,
            tracker,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn room_lock(&self, room_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(room_id.to_string())
            .or_default()
            .clone()
    }

    pub(crate) fn forget_room(&self, room_id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(room_id);
    }

    /// Persist the room's state as version `current + 1`.
    ///
    /// Materializations of the same room run one at a time. When the write
    /// fails the drained contributors are handed back to the tracker.
    pub async fn materialize(
        &self,
        room: &Room,
        triggering_user: &str,
        description: Option<String>,
    ) -> Result<SnapshotReceipt, CollabError> {
        let room_id = room.room_id();
        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;

        let current = self
            .store
            .current_version(room_id)
            .await?
            .ok_or_else(|| CollabError::NotFound(room_id.to_string()))?;

        // Everything credited to this version is part of its content; changes
        // merged afterwards stay pending for the next one.
        let (capture, taken) = room
            .capture_with(|| self.tracker.take_contributors(room_id))
            .await?;
        let content = match (SnapshotPackage {
            snapshot: capture.snapshot,
            state_vector: capture.state_vector.clone(),
        })
        .to_bytes()
        {
            Ok(content) => content,
            Err(e) => {
                self.tracker.restore_taken(room_id, &taken);
                return Err(e);
            }
        };

        let contributors = self.tracker.resolve_contributors(room_id, taken).await;
        let snapshot = NewSnapshot {
            version: current + 1,
            content,
            plain_text: capture.plain_text,
            contributors,
            created_by: triggering_user.to_string(),
            description,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.persist_snapshot(room_id, &snapshot).await {
            error!("Failed to persist version {} of room {}: {}", snapshot.version, room_id, e);
            self.tracker.restore(room_id, &snapshot.contributors);
            return Err(e);
        }

        info!(
            "Materialized room {} as version {} ({} contributors, by {})",
            room_id,
            snapshot.version,
            snapshot.contributors.len(),
            triggering_user
        );

        Ok(SnapshotReceipt {
            room_id: room_id.to_string(),
            version: snapshot.version,
            contributors: snapshot.contributors,
            state_vector: capture.state_vector,
            created_at: snapshot.created_at,
        })
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::models::Contributor;
use crate::services::ports::UserDirectory;

/// When accumulated changes should be folded into a new version.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotThresholds {
    /// Materialize once this much time passed since the last snapshot (and something changed).
    pub interval: Duration,
    /// Materialize once this many change units accumulated.
    pub change_threshold: u64,
}

impl Default for SnapshotThresholds {
    fn default() -> Self {
        Self {
            interval: Duration::minutes(5),
            change_threshold: 100,
        }
    }
}

/// Changes of one room since its last snapshot.
#[derive(Debug, Clone)]
pub struct ChangeTrackingState {
    pub contributors: HashMap<String, u64>,
    pub total_changes: u64,
    pub last_snapshot_at: DateTime<Utc>,
}

impl ChangeTrackingState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            contributors: HashMap::new(),
            total_changes: 0,
            last_snapshot_at: now,
        }
    }
}

/// Per-room tally of edit volume by contributor.
pub struct ChangeTracker {
    rooms: Mutex<HashMap<String, ChangeTrackingState>>,
    thresholds: SnapshotThresholds,
    users: Arc<dyn UserDirectory>,
}

impl ChangeTracker {
    pub fn new(thresholds: SnapshotThresholds, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            thresholds,
            users,
        }
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, ChangeTrackingState>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_change(&self, room_id: &str, contributor_id: &str, magnitude: u64) {
        self.record_change_at(room_id, contributor_id, magnitude, Utc::now());
    }

    pub fn record_change_at(&self, room_id: &str, contributor_id: &str, magnitude: u64, now: DateTime<Utc>) {
        let mut rooms = self.rooms();
        let state = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| ChangeTrackingState::new(now));
        *state.contributors.entry(contributor_id.to_string()).or_insert(0) += magnitude;
        state.total_changes += magnitude;
        debug!(
            "Room {}: {} +{} (total {})",
            room_id, contributor_id, magnitude, state.total_changes
        );
    }

    pub fn should_materialize(&self, room_id: &str) -> bool {
        self.should_materialize_at(room_id, Utc::now())
    }

    pub fn should_materialize_at(&self, room_id: &str, now: DateTime<Utc>) -> bool {
        let rooms = self.rooms();
        let Some(state) = rooms.get(room_id) else {
            return false;
        };
        if state.total_changes == 0 {
            return false;
        }
        let elapsed = now - state.last_snapshot_at;
        elapsed >= self.thresholds.interval || state.total_changes >= self.thresholds.change_threshold
    }

    /// Whether anything was recorded since the last snapshot.
    pub fn has_pending(&self, room_id: &str) -> bool {
        self.rooms()
            .get(room_id)
            .map(|s| s.total_changes > 0)
            .unwrap_or(false)
    }

    pub fn state(&self, room_id: &str) -> Option<ChangeTrackingState> {
        self.rooms().get(room_id).cloned()
    }

    pub fn tracked_rooms(&self) -> usize {
        self.rooms().len()
    }

    /// Take the contributors of a room and reset its baseline.
    ///
    /// The per-contributor map is cleared and the total and timestamp are reset
    /// under one lock; name resolution happens afterwards. The result is sorted
    /// by descending change count, ties by user id.
    pub async fn drain_contributors(&self, room_id: &str) -> Vec<Contributor> {
        let taken = self.take_contributors(room_id);
        self.resolve_contributors(room_id, taken).await
    }

    /// The raw half of [`drain_contributors`](Self::drain_contributors): user
    /// ids with their change counts, the room reset to a fresh baseline.
    pub fn take_contributors(&self, room_id: &str) -> Vec<(String, u64)> {
        let mut rooms = self.rooms();
        let state = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| ChangeTrackingState::new(Utc::now()));
        let taken = state.contributors.drain().collect();
        state.total_changes = 0;
        state.last_snapshot_at = Utc::now();
        taken
    }

    /// Attach display names to taken contributors and sort them.
    pub async fn resolve_contributors(&self, room_id: &str, taken: Vec<(String, u64)>) -> Vec<Contributor> {
        if taken.is_empty() {
            return Vec::new();
        }

        let ids: Vec<String> = taken.iter().map(|(id, _)| id.clone()).collect();
        let names: HashMap<String, String> = match self.users.resolve_users(&ids).await {
            Ok(profiles) => profiles.into_iter().map(|p| (p.id, p.name)).collect(),
            Err(e) => {
                warn!("Failed to resolve contributors of room {}: {}", room_id, e);
                HashMap::new()
            }
        };

        let mut contributors: Vec<Contributor> = taken
            .into_iter()
            .map(|(user_id, changes_count)| Contributor {
                name: names.get(&user_id).cloned().unwrap_or_else(|| user_id.clone()),
                user_id,
                changes_count,
            })
            .collect();
        contributors.sort_by(|a, b| {
            b.changes_count
                .cmp(&a.changes_count)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        contributors
    }

    /// Put drained contributors back after a failed snapshot so the next
    /// attempt still credits them. The snapshot timestamp stays reset.
    pub fn restore(&self, room_id: &str, contributors: &[Contributor]) {
        let taken: Vec<(String, u64)> = contributors
            .iter()
            .map(|c| (c.user_id.clone(), c.changes_count))
            .collect();
        self.restore_taken(room_id, &taken);
    }

    pub fn restore_taken(&self, room_id: &str, taken: &[(String, u64)]) {
        if taken.is_empty() {
            return;
        }
        let mut rooms = self.rooms();
        let state = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| ChangeTrackingState::new(Utc::now()));
        for (user_id, changes_count) in taken {
            *state.contributors.entry(user_id.clone()).or_insert(0) += changes_count;
            state.total_changes += changes_count;
        }
    }

    pub fn forget(&self, room_id: &str) {
        self.rooms().remove(room_id);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{CollabError, UserProfile};
    use async_trait::async_trait;

    /// Directory backed by a fixed map.
    pub(crate) struct MapDirectory(pub HashMap<String, String>);

    #[async_trait]
    impl UserDirectory for MapDirectory {
        async fn resolve_users(&self, ids: &[String]) -> Result<Vec<UserProfile>, CollabError> {
            Ok(ids
                .iter()
                .filter_map(|id| {
                    self.0.get(id).map(|name| UserProfile { id: id.clone(), name: name.clone() })
                })
                .collect())
        }
    }

    struct BrokenDirectory;

    #[async_trait]
    impl UserDirectory for BrokenDirectory {
        async fn resolve_users(&self, _ids: &[String]) -> Result<Vec<UserProfile>, CollabError> {
            Err(CollabError::Persistence("directory down".into()))
        }
    }

    pub(crate) fn tracker_with_names(names: &[(&str, &str)]) -> ChangeTracker {
        let map = names.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ChangeTracker::new(SnapshotThresholds::default(), Arc::new(MapDirectory(map)))
    }

    #[test]
    fn size_threshold_triggers() {
        let tracker = tracker_with_names(&[]);
        tracker.record_change("draft-1", "a", 50);
        tracker.record_change("draft-1", "b", 30);
        assert!(!tracker.should_materialize("draft-1"));
        tracker.record_change("draft-1", "c", 25);
        tracker.record_change("draft-1", "d", 20);
        assert!(tracker.should_materialize("draft-1"));
        assert_eq!(tracker.state("draft-1").unwrap().total_changes, 125);
    }

    #[test]
    fn time_threshold_triggers_below_size() {
        let tracker = tracker_with_names(&[]);
        let start = Utc::now();
        tracker.record_change_at("draft-1", "a", 10, start);

        assert!(!tracker.should_materialize_at("draft-1", start + Duration::minutes(1)));
        assert!(tracker.should_materialize_at("draft-1", start + Duration::minutes(6)));
    }

    #[test]
    fn no_changes_never_triggers() {
        let tracker = tracker_with_names(&[]);
        assert!(!tracker.should_materialize_at("draft-1", Utc::now() + Duration::hours(1)));
        assert!(!tracker.has_pending("draft-1"));
    }

    #[test]
    fn rooms_are_tracked_separately() {
        let tracker = tracker_with_names(&[]);
        tracker.record_change("draft-1", "a", 120);
        tracker.record_change("draft-2", "a", 5);
        assert!(tracker.should_materialize("draft-1"));
        assert!(!tracker.should_materialize("draft-2"));
        assert_eq!(tracker.tracked_rooms(), 2);
    }

    #[tokio::test]
    async fn drain_sorts_resolves_and_resets() {
        let tracker = tracker_with_names(&[("a", "Ada"), ("b", "Bob")]);
        tracker.record_change("r", "b", 30);
        tracker.record_change("r", "a", 50);
        tracker.record_change("r", "c", 30);
        tracker.record_change("r", "b", 5);

        let contributors = tracker.drain_contributors("r").await;
        let summary: Vec<(&str, &str, u64)> = contributors
            .iter()
            .map(|c| (c.user_id.as_str(), c.name.as_str(), c.changes_count))
            .collect();
        assert_eq!(summary, vec![("a", "Ada", 50), ("b", "Bob", 35), ("c", "c", 30)]);

        let state = tracker.state("r").unwrap();
        assert_eq!(state.total_changes, 0);
        assert!(state.contributors.is_empty());
        assert!(!tracker.should_materialize("r"));
    }

    #[tokio::test]
    async fn drain_without_changes_is_empty() {
        let tracker = tracker_with_names(&[]);
        assert!(tracker.drain_contributors("nothing").await.is_empty());
    }

    #[tokio::test]
    async fn directory_failure_falls_back_to_ids() {
        let tracker = ChangeTracker::new(SnapshotThresholds::default(), Arc::new(BrokenDirectory));
        tracker.record_change("r", "u1", 3);
        let contributors = tracker.drain_contributors("r").await;
        assert_eq!(contributors[0].name, "u1");
    }

    #[tokio::test]
    async fn restore_puts_contributors_back() {
        let tracker = tracker_with_names(&[]);
        tracker.record_change("r", "a", 40);
        let drained = tracker.drain_contributors("r").await;
        tracker.record_change("r", "a", 2);
        tracker.restore("r", &drained);

        let state = tracker.state("r").unwrap();
        assert_eq!(state.total_changes, 42);
        assert_eq!(state.contributors["a"], 42);
    }
}

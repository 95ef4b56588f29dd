use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::models::{CollabError, CollabMessage, SnapshotPackage, SyncMessage};
use crate::services::ports::DocumentStore;
use crate::ws::awareness::{AwarenessChanges, AwarenessTable};
use crate::ws::connctx::{ConnCtx, ConnHandle, ConnId};
use crate::ws::shareddoc::SharedDoc;

/// A merged document update, on its way to the change tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub user_id: String,
    pub magnitude: u64,
}

/// Document state captured for a snapshot.
#[derive(Debug, Clone)]
pub struct DocCapture {
    pub snapshot: Vec<u8>,
    pub state_vector: Vec<u8>,
    pub plain_text: String,
}

struct RoomState {
    doc: SharedDoc,
    conns: HashMap<ConnId, ConnHandle>,
    awareness: AwarenessTable,
}

/// One collaboratively edited document with its live connections.
///
/// Everything mutable sits behind a single async lock, so a merge and the
/// broadcast of its result are enqueued for every peer before the next
/// message of the room is looked at.
pub struct Room {
    room_id: String,
    state: Mutex<RoomState>,
    loaded: OnceCell<()>,
    changes: mpsc::UnboundedSender<ChangeEvent>,
    in_flight: AtomicUsize,
    last_active: StdMutex<Instant>,
    evicted: AtomicBool,
}

impl Room {
    pub fn new(room_id: impl Into<String>, changes: mpsc::UnboundedSender<ChangeEvent>) -> Self {
        Self {
            room_id: room_id.into(),
            state: Mutex::new(RoomState {
                doc: SharedDoc::new(),
                conns: HashMap::new(),
                awareness: AwarenessTable::new(),
            }),
            loaded: OnceCell::new(),
            changes,
            in_flight: AtomicUsize::new(0),
            last_active: StdMutex::new(Instant::now()),
            evicted: AtomicBool::new(false),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Import the persisted state once. Concurrent callers wait for the first
    /// load; a failed load is retried by the next caller.
    pub async fn ensure_loaded(&self, store: &dyn DocumentStore) -> Result<(), CollabError> {
        self.loaded
            .get_or_try_init(|| async {
                if let Some(bytes) = store.load_document_state(&self.room_id).await? {
                    let package = SnapshotPackage::from_bytes(&bytes)?;
                    let state = self.state.lock().await;
                    state
                        .doc
                        .apply_update(&package.snapshot)
                        .map_err(|e| CollabError::Persistence(format!("Stored state of room {} is unreadable: {}", self.room_id, e)))?;
                    info!("Loaded room {} from storage ({} bytes)", self.room_id, bytes.len());
                } else {
                    info!("Room {} starts from an empty document", self.room_id);
                }
                Ok::<(), CollabError>(())
            })
            .await
            .map(|_| ())
    }

    /// Register a connection and start its handshake: a sync step 1 with the
    /// room's state vector, followed by the current awareness states.
    ///
    /// Returns `false` when the room was evicted in the meantime.
    pub async fn join(&self, handle: ConnHandle) -> bool {
        let mut guard = self.state.lock().await;
        if self.evicted.load(Ordering::Acquire) {
            return false;
        }
        let state = &mut *guard;

        let step1 = CollabMessage::Sync(SyncMessage::Step1(state.doc.encode_state_vector())).encode();
        handle.send(Arc::new(step1));
        if let Some(update) = state.awareness.encode_all() {
            handle.send(Arc::new(CollabMessage::Awareness(update).encode()));
        }

        debug!("Connection {} joined room {}", handle.ctx.conn_id, self.room_id);
        state.conns.insert(handle.ctx.conn_id, handle);
        self.touch();
        true
    }

    /// Remove a connection together with the awareness states it controls and
    /// tell the remaining peers they left.
    pub async fn leave(&self, conn_id: ConnId) -> Option<ConnHandle> {
        let mut guard = self.state.lock().await;
        let handle = drop_connection(&mut guard, conn_id);
        self.touch();
        handle
    }

    /// Dispatch one decoded frame from `ctx`.
    pub async fn receive(&self, ctx: &ConnCtx, msg: CollabMessage) -> Result<(), CollabError> {
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if !state.conns.contains_key(&ctx.conn_id) {
                return Ok(());
            }

            let event = match msg {
                CollabMessage::Sync(SyncMessage::Step1(state_vector)) => {
                    let diff = state.doc.encode_state_as_update(Some(state_vector.as_slice()))?;
                    let frame = CollabMessage::Sync(SyncMessage::Step2(diff)).encode();
                    send_to(state, ctx.conn_id, Arc::new(frame));
                    None
                }
                CollabMessage::Sync(SyncMessage::Step2(update))
                | CollabMessage::Sync(SyncMessage::Update(update)) => match state.doc.apply_update(&update)? {
                    Some(merged) => {
                        let frame = CollabMessage::Sync(SyncMessage::Update(merged)).encode();
                        broadcast(state, Arc::new(frame), Some(ctx.conn_id));
                        Some(ChangeEvent {
                            user_id: ctx.user_id.clone(),
                            magnitude: update.len() as u64,
                        })
                    }
                    None => None,
                },
                CollabMessage::Awareness(update) => {
                    let changes = state.awareness.apply_update(&update)?;
                    if let Some(conn) = state.conns.get_mut(&ctx.conn_id) {
                        for id in changes.added.iter().chain(changes.updated.iter()) {
                            conn.controlled.insert(*id);
                        }
                        for id in &changes.removed {
                            conn.controlled.remove(id);
                        }
                    }
                    broadcast_awareness(state, &changes);
                    None
                }
                CollabMessage::QueryAwareness => {
                    if let Some(update) = state.awareness.encode_all() {
                        send_to(state, ctx.conn_id, Arc::new(CollabMessage::Awareness(update).encode()));
                    }
                    None
                }
            };

            // Counted before the lock is released, so an eviction check never
            // sees a merged change that is not yet on its way to the tracker.
            if let Some(event) = event {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
                if self.changes.send(event).is_err() {
                    self.in_flight.fetch_sub(1, Ordering::AcqRel);
                    warn!("Change pipeline of room {} is closed, change not tracked", self.room_id);
                }
            }
        }

        self.touch();
        Ok(())
    }

    /// Capture the document and run `take` without letting a merge in between.
    ///
    /// Whatever `take` drains from the change tracker is then guaranteed to be
    /// contained in the captured state.
    pub async fn capture_with<T>(&self, take: impl FnOnce() -> T) -> Result<(DocCapture, T), CollabError> {
        let state = self.state.lock().await;
        let capture = DocCapture {
            snapshot: state.doc.snapshot()?,
            state_vector: state.doc.encode_state_vector(),
            plain_text: state.doc.plain_text(),
        };
        Ok((capture, take()))
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.conns.len()
    }

    pub async fn has_connection(&self, conn_id: ConnId) -> bool {
        self.state.lock().await.conns.contains_key(&conn_id)
    }

    pub async fn awareness_count(&self) -> usize {
        self.state.lock().await.awareness.len()
    }

    /// Change events queued but not yet processed by the change pipeline.
    pub fn pending_changes(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn change_processed(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Mark the room as evicted if nobody used it for `ttl` and `has_pending`
    /// reports no untracked work. Never waits for the lock.
    ///
    /// In-flight events are checked before `has_pending`: once the pipeline
    /// has processed an event its change is visible to the tracker.
    pub(crate) fn try_evict(&self, ttl: Duration, has_pending: impl FnOnce() -> bool) -> bool {
        let Ok(state) = self.state.try_lock() else {
            return false;
        };
        if !state.conns.is_empty() || self.pending_changes() > 0 || self.idle_for() < ttl || has_pending() {
            return false;
        }
        self.evicted.store(true, Ordering::Release);
        true
    }
}

fn send_to(state: &mut RoomState, conn_id: ConnId, frame: Arc<Vec<u8>>) {
    let delivered = state.conns.get(&conn_id).map(|c| c.send(frame)).unwrap_or(true);
    if !delivered {
        warn!("Dropping connection {}: outbound buffer full or closed", conn_id);
        drop_connection(state, conn_id);
    }
}

/// Queue `frame` for every connection except `exclude`. Peers that cannot
/// take it are torn down.
fn broadcast(state: &mut RoomState, frame: Arc<Vec<u8>>, exclude: Option<ConnId>) {
    let failed: Vec<ConnId> = state
        .conns
        .iter()
        .filter(|(id, _)| Some(**id) != exclude)
        .filter(|(_, conn)| !conn.send(frame.clone()))
        .map(|(id, _)| *id)
        .collect();

    for conn_id in failed {
        warn!("Dropping connection {}: outbound buffer full or closed", conn_id);
        drop_connection(state, conn_id);
    }
}

fn broadcast_awareness(state: &mut RoomState, changes: &AwarenessChanges) {
    if changes.is_empty() {
        return;
    }
    let update = state.awareness.encode_update(&changes.changed());
    broadcast(state, Arc::new(CollabMessage::Awareness(update).encode()), None);
}

fn drop_connection(state: &mut RoomState, conn_id: ConnId) -> Option<ConnHandle> {
    let handle = state.conns.remove(&conn_id)?;
    let changes = state.awareness.remove_states(&handle.controlled);
    broadcast_awareness(state, &changes);
    Some(handle)
}

//! Ephemeral per-client presence state of a room.
//!
//! Update encoding: var-uint entry count, then for each entry the var-uint
//! client id, var-uint clock and a var-string JSON state, where `null` marks a
//! client that left. States live in a loro `EphemeralStore` keyed by client
//! id; the protocol clocks are tracked next to it. Nothing here is ever
//! persisted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use loro::awareness::{EphemeralStore, EphemeralStoreEvent};
use loro::{LoroValue, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::models::CollabError;
use crate::websocket::codec::{Decoder, Encoder};

/// Entries only leave the store through an explicit removal.
const NO_EXPIRY: i64 = i64::MAX;

/// Who a client is, as shown to the other participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Selection of a client. Anchor and focus are opaque relative positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub anchor: Value,
    pub focus: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwarenessState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<PresenceUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AwarenessChanges {
    pub added: Vec<u64>,
    pub updated: Vec<u64>,
    pub removed: Vec<u64>,
}

impl AwarenessChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// added ∪ updated ∪ removed
    pub fn changed(&self) -> Vec<u64> {
        self.added
            .iter()
            .chain(self.updated.iter())
            .chain(self.removed.iter())
            .copied()
            .collect()
    }

    fn absorb(&mut self, event: &EphemeralStoreEvent) {
        self.added.extend(event.added.iter().filter_map(|k| parse_key(k)));
        self.updated.extend(event.updated.iter().filter_map(|k| parse_key(k)));
        self.removed.extend(event.removed.iter().filter_map(|k| parse_key(k)));
    }
}

pub struct AwarenessTable {
    store: EphemeralStore,
    clocks: HashMap<u64, u64>,
    events: Arc<Mutex<AwarenessChanges>>,
    _subscription: Subscription,
}

impl Default for AwarenessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AwarenessTable {
    pub fn new() -> Self {
        let store = EphemeralStore::new(NO_EXPIRY);
        let events = Arc::new(Mutex::new(AwarenessChanges::default()));
        let sink = events.clone();
        let subscription = store.subscribe(Box::new(move |event: &EphemeralStoreEvent| {
            sink.lock().unwrap_or_else(PoisonError::into_inner).absorb(event);
            true
        }));
        Self {
            store,
            clocks: HashMap::new(),
            events,
            _subscription: subscription,
        }
    }

    pub fn len(&self) -> usize {
        self.store.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, client_id: u64) -> Option<AwarenessState> {
        let value = Value::from(self.store.get(&client_id.to_string())?);
        serde_json::from_value(value).ok()
    }

    fn is_present(&self, client_id: u64) -> bool {
        self.store.get(&client_id.to_string()).is_some()
    }

    /// Apply an encoded update from a peer.
    ///
    /// An entry wins when its clock is newer than the known one, or equal with a
    /// `null` state for a client that is still present.
    pub fn apply_update(&mut self, update: &[u8]) -> Result<AwarenessChanges, CollabError> {
        let entries = decode_entries(update)?;

        for (client_id, clock, state) in entries {
            let current = self.clocks.get(&client_id).copied().unwrap_or(0);
            let present = self.is_present(client_id);

            let newer = current < clock;
            let equal_removal = current == clock && state.is_none() && present;
            if !(newer || equal_removal) {
                continue;
            }

            let key = client_id.to_string();
            match state {
                Some(state) => self.store.set(&key, state),
                None if present => self.store.delete(&key),
                None => {}
            }
            self.clocks.insert(client_id, clock);
        }

        Ok(self.take_changes())
    }

    /// Drop the states of `clients`, bumping their clocks so peers accept the removal.
    pub fn remove_states(&mut self, clients: &HashSet<u64>) -> AwarenessChanges {
        for client_id in clients {
            if self.is_present(*client_id) {
                self.store.delete(&client_id.to_string());
                *self.clocks.entry(*client_id).or_insert(0) += 1;
            }
        }
        self.take_changes()
    }

    /// Encode the current entries of `clients`; clients without a state are encoded as `null`.
    pub fn encode_update(&self, clients: &[u64]) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_var_uint(clients.len() as u64);
        for client_id in clients {
            let clock = self.clocks.get(client_id).copied().unwrap_or(0);
            let json = match self.store.get(&client_id.to_string()) {
                Some(state) => Value::from(state).to_string(),
                None => "null".to_string(),
            };
            enc.write_var_uint(*client_id);
            enc.write_var_uint(clock);
            enc.write_var_string(&json);
        }
        enc.into_inner()
    }

    /// Encode every present client, or `None` when the table is empty.
    pub fn encode_all(&self) -> Option<Vec<u8>> {
        let mut clients: Vec<u64> = self.store.keys().iter().filter_map(|k| parse_key(k)).collect();
        if clients.is_empty() {
            return None;
        }
        clients.sort_unstable();
        Some(self.encode_update(&clients))
    }

    fn take_changes(&self) -> AwarenessChanges {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

fn parse_key(key: &str) -> Option<u64> {
    match key.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!("Ignoring awareness key '{}' that is not a client id", key);
            None
        }
    }
}

fn decode_entries(update: &[u8]) -> Result<Vec<(u64, u64, Option<LoroValue>)>, CollabError> {
    let mut dec = Decoder::new(update);
    let len = dec.read_var_uint()?;
    let mut entries = Vec::new();
    for _ in 0..len {
        let client_id = dec.read_var_uint()?;
        let clock = dec.read_var_uint()?;
        let json = dec.read_var_string()?;
        let state: Option<AwarenessState> = serde_json::from_str(json)
            .map_err(|e| CollabError::Protocol(format!("invalid awareness state for client {}: {}", client_id, e)))?;
        let state = state
            .map(|s| serde_json::to_value(s).map(LoroValue::from))
            .transpose()
            .map_err(|e| CollabError::Protocol(format!("invalid awareness state for client {}: {}", client_id, e)))?;
        entries.push((client_id, clock, state));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(entries: &[(u64, u64, Value)]) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_var_uint(entries.len() as u64);
        for (client, clock, state) in entries {
            enc.write_var_uint(*client);
            enc.write_var_uint(*clock);
            enc.write_var_string(&state.to_string());
        }
        enc.into_inner()
    }

    fn presence(name: &str) -> Value {
        json!({ "user": { "name": name, "color": "#f00" }, "cursor": { "anchor": 1, "focus": 4 } })
    }

    #[test]
    fn tracks_added_updated_and_removed() {
        let mut table = AwarenessTable::new();

        let changes = table.apply_update(&update(&[(7, 1, presence("Ada"))])).unwrap();
        assert_eq!(changes.added, vec![7]);
        let state = table.get(7).unwrap();
        assert_eq!(state.user.as_ref().unwrap().name.as_deref(), Some("Ada"));
        assert_eq!(state.cursor.as_ref().unwrap().focus, json!(4));

        let changes = table.apply_update(&update(&[(7, 2, presence("Ada L."))])).unwrap();
        assert_eq!(changes.updated, vec![7]);

        let changes = table.apply_update(&update(&[(7, 3, Value::Null)])).unwrap();
        assert_eq!(changes.removed, vec![7]);
        assert!(table.is_empty());
    }

    #[test]
    fn stale_clocks_are_ignored() {
        let mut table = AwarenessTable::new();
        table.apply_update(&update(&[(1, 5, presence("new"))])).unwrap();
        let changes = table.apply_update(&update(&[(1, 4, presence("old"))])).unwrap();
        assert!(changes.is_empty());
        assert_eq!(table.get(1).unwrap().user.unwrap().name.as_deref(), Some("new"));
    }

    #[test]
    fn equal_clock_removal_is_accepted() {
        let mut table = AwarenessTable::new();
        table.apply_update(&update(&[(1, 5, presence("x"))])).unwrap();
        let changes = table.apply_update(&update(&[(1, 5, Value::Null)])).unwrap();
        assert_eq!(changes.removed, vec![1]);
    }

    #[test]
    fn removal_of_unknown_client_reports_nothing() {
        let mut table = AwarenessTable::new();
        let changes = table.apply_update(&update(&[(4, 2, Value::Null)])).unwrap();
        assert!(changes.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn remove_states_bumps_clock_and_encodes_null() {
        let mut table = AwarenessTable::new();
        table.apply_update(&update(&[(1, 2, presence("a")), (2, 1, presence("b"))])).unwrap();

        let changes = table.remove_states(&HashSet::from([1, 99]));
        assert_eq!(changes.removed, vec![1]);
        assert_eq!(table.len(), 1);

        // a peer holding the old state accepts the removal
        let mut peer = AwarenessTable::new();
        peer.apply_update(&update(&[(1, 2, presence("a"))])).unwrap();
        let peer_changes = peer.apply_update(&table.encode_update(&changes.changed())).unwrap();
        assert_eq!(peer_changes.removed, vec![1]);
        assert!(peer.is_empty());
    }

    #[test]
    fn encode_all_skips_empty_table() {
        let mut table = AwarenessTable::new();
        assert!(table.encode_all().is_none());
        table.apply_update(&update(&[(3, 1, json!({ "user": { "name": "c" } }))])).unwrap();

        let mut mirror = AwarenessTable::new();
        mirror.apply_update(&table.encode_all().unwrap()).unwrap();
        assert_eq!(mirror.get(3), table.get(3));
    }

    #[test]
    fn non_object_state_is_a_protocol_error() {
        let mut table = AwarenessTable::new();
        let err = table.apply_update(&update(&[(1, 1, json!(42))])).unwrap_err();
        assert!(matches!(err, CollabError::Protocol(_)));
    }
}

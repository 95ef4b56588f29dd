use loro::{ExportMode, LoroDoc, ToJson, VersionVector};
use tracing::debug;

use crate::models::{lorodoc, CollabError};

/// The replicated document of one room.
///
/// Wraps a `LoroDoc` behind the three operations the sync protocol needs:
/// merge a remote update, encode state as an update (optionally relative to a
/// peer's state vector), and encode the local state vector.
pub struct SharedDoc {
    doc: LoroDoc,
}

impl SharedDoc {
    pub fn new() -> Self {
        Self { doc: LoroDoc::new() }
    }

    /// Merge a remote update.
    ///
    /// Returns the update re-encoded against the state before the merge, or
    /// `None` when the merge changed nothing (duplicate or not yet applicable).
    pub fn apply_update(&self, update: &[u8]) -> Result<Option<Vec<u8>>, CollabError> {
        let before = self.doc.oplog_vv();
        self.doc
            .import(update)
            .map_err(|e| CollabError::Protocol(format!("Failed to import update: {}", e)))?;

        if self.doc.oplog_vv() == before {
            debug!("Update of {} bytes was void", update.len());
            return Ok(None);
        }

        let merged = self
            .doc
            .export(ExportMode::updates(&before))
            .map_err(|e| CollabError::Protocol(format!("Failed to encode merged update: {}", e)))?;
        Ok(Some(merged))
    }

    /// Encode everything a peer with `state_vector` is missing. An empty or
    /// absent state vector yields the full state.
    pub fn encode_state_as_update(&self, state_vector: Option<&[u8]>) -> Result<Vec<u8>, CollabError> {
        let from = match state_vector {
            Some(sv) if !sv.is_empty() => VersionVector::decode(sv)
                .map_err(|e| CollabError::Protocol(format!("Invalid state vector: {}", e)))?,
            _ => VersionVector::default(),
        };
        self.doc
            .export(ExportMode::updates(&from))
            .map_err(|e| CollabError::Protocol(format!("Failed to encode state: {}", e)))
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.doc.oplog_vv().encode()
    }

    /// Full snapshot, used for persistence.
    pub fn snapshot(&self) -> Result<Vec<u8>, CollabError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| CollabError::Persistence(format!("Failed to export snapshot: {}", e)))
    }

    pub fn plain_text(&self) -> String {
        lorodoc::plain_text(&self.doc)
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.doc.get_deep_value().to_json_value()
    }
}

impl Default for SharedDoc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An edit made by an independent client replica.
    fn client_edit(text: &str) -> Vec<u8> {
        let client = LoroDoc::new();
        client.get_text("content").insert(0, text).unwrap();
        client.commit();
        client.export(ExportMode::all_updates()).unwrap()
    }

    #[test]
    fn merge_order_does_not_matter() {
        let updates = vec![client_edit("alpha"), client_edit("beta"), client_edit("gamma")];

        let a = SharedDoc::new();
        for u in &updates {
            a.apply_update(u).unwrap();
        }

        let b = SharedDoc::new();
        for u in updates.iter().rev() {
            b.apply_update(u).unwrap();
        }
        // duplicates on top
        b.apply_update(&updates[1]).unwrap();

        assert_eq!(a.to_json(), b.to_json());
        assert_eq!(a.plain_text(), b.plain_text());
    }

    #[test]
    fn reapplying_an_update_is_void() {
        let doc = SharedDoc::new();
        let update = client_edit("hello");

        assert!(doc.apply_update(&update).unwrap().is_some());
        let once = doc.to_json();

        assert!(doc.apply_update(&update).unwrap().is_none());
        assert_eq!(doc.to_json(), once);
    }

    #[test]
    fn diff_against_state_vector_brings_peer_up_to_date() {
        let server = SharedDoc::new();
        server.apply_update(&client_edit("one")).unwrap();

        let peer = SharedDoc::new();
        peer.apply_update(&server.encode_state_as_update(None).unwrap()).unwrap();

        server.apply_update(&client_edit("two")).unwrap();
        let diff = server
            .encode_state_as_update(Some(&peer.encode_state_vector()))
            .unwrap();
        peer.apply_update(&diff).unwrap();

        assert_eq!(peer.to_json(), server.to_json());
        assert_eq!(peer.encode_state_vector(), server.encode_state_vector());
    }

    #[test]
    fn garbage_update_is_a_protocol_error() {
        let doc = SharedDoc::new();
        assert!(matches!(doc.apply_update(b"not a loro update"), Err(CollabError::Protocol(_))));
    }

    #[test]
    fn snapshot_restores_content() {
        let doc = SharedDoc::new();
        doc.apply_update(&client_edit("persist me")).unwrap();

        let restored = SharedDoc::new();
        restored.apply_update(&doc.snapshot().unwrap()).unwrap();
        assert_eq!(restored.plain_text(), "persist me");
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{CollabError, Contributor, Identity, NewSnapshot};
use crate::services::ports::{DocumentStore, PermissionChecker};

/// A version row as the in-memory store keeps it.
#[derive(Debug, Clone)]
pub struct StoredVersion {
    pub version: u32,
    pub content: Vec<u8>,
    pub plain_text: String,
    pub contributors: Vec<Contributor>,
    pub created_by: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemDocument {
    editors: HashSet<String>,
    current_version: u32,
    versions: Vec<StoredVersion>,
}

/// Document and permission store that lives in process memory.
///
/// Used when no database is configured, and by tests.
pub struct MemColab {
    docs: Mutex<HashMap<String, MemDocument>>,
    open_access: bool,
}

impl MemColab {
    /// Documents must be inserted and editors granted explicitly.
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            open_access: false,
        }
    }

    /// Every authenticated caller may edit, documents appear on first load.
    pub fn open() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            open_access: true,
        }
    }

    fn docs(&self) -> MutexGuard<'_, HashMap<String, MemDocument>> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_document(&self, room_id: &str, current_version: u32) {
        self.docs().insert(
            room_id.to_string(),
            MemDocument {
                current_version,
                ..MemDocument::default()
            },
        );
    }

    pub fn grant(&self, room_id: &str, user_id: &str) {
        self.docs()
            .entry(room_id.to_string())
            .or_default()
            .editors
            .insert(user_id.to_string());
    }

    pub fn versions(&self, room_id: &str) -> Vec<StoredVersion> {
        self.docs()
            .get(room_id)
            .map(|d| d.versions.clone())
            .unwrap_or_default()
    }

    pub fn current_version_of(&self, room_id: &str) -> Option<u32> {
        self.docs().get(room_id).map(|d| d.current_version)
    }
}

impl Default for MemColab {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionChecker for MemColab {
    async fn check_permission(&self, room_id: &str, identity: &Identity) -> Result<bool, CollabError> {
        if self.open_access {
            return Ok(true);
        }
        Ok(self
            .docs()
            .get(room_id)
            .map(|d| d.editors.contains(&identity.subject))
            .unwrap_or(false))
    }
}

#[async_trait]
impl DocumentStore for MemColab {
    async fn load_document_state(&self, room_id: &str) -> Result<Option<Vec<u8>>, CollabError> {
        let mut docs = self.docs();
        if self.open_access {
            docs.entry(room_id.to_string()).or_default();
        }
        let Some(doc) = docs.get(room_id) else {
            return Err(CollabError::NotFound(room_id.to_string()));
        };
        Ok(doc
            .versions
            .iter()
            .find(|v| v.version == doc.current_version)
            .map(|v| v.content.clone()))
    }

    async fn current_version(&self, room_id: &str) -> Result<Option<u32>, CollabError> {
        Ok(self.current_version_of(room_id))
    }

    async fn persist_snapshot(&self, room_id: &str, snapshot: &NewSnapshot) -> Result<(), CollabError> {
        let mut docs = self.docs();
        let doc = docs
            .get_mut(room_id)
            .ok_or_else(|| CollabError::NotFound(room_id.to_string()))?;
        if doc.current_version + 1 != snapshot.version {
            return Err(CollabError::Persistence(format!(
                "Version conflict on {}: current {}, writing {}",
                room_id, doc.current_version, snapshot.version
            )));
        }
        doc.versions.push(StoredVersion {
            version: snapshot.version,
            content: snapshot.content.clone(),
            plain_text: snapshot.plain_text.clone(),
            contributors: snapshot.contributors.clone(),
            created_by: snapshot.created_by.clone(),
            description: snapshot.description.clone(),
            created_at: snapshot.created_at,
        });
        doc.current_version = snapshot.version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(version: u32) -> NewSnapshot {
        NewSnapshot {
            version,
            content: vec![version as u8],
            plain_text: String::new(),
            contributors: Vec::new(),
            created_by: "u1".into(),
            description: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn strict_store_checks_grants() {
        let store = MemColab::new();
        store.grant("draft-1", "u1");
        assert!(store.check_permission("draft-1", &Identity::user("u1", "acme")).await.unwrap());
        assert!(!store.check_permission("draft-1", &Identity::user("u2", "acme")).await.unwrap());
        assert!(!store.check_permission("draft-2", &Identity::user("u1", "acme")).await.unwrap());
    }

    #[tokio::test]
    async fn persist_moves_pointer_and_rejects_stale_versions() {
        let store = MemColab::new();
        store.insert_document("draft-1", 2);
        assert_eq!(store.load_document_state("draft-1").await.unwrap(), None);

        store.persist_snapshot("draft-1", &snapshot(3)).await.unwrap();
        assert_eq!(store.current_version("draft-1").await.unwrap(), Some(3));
        assert_eq!(store.load_document_state("draft-1").await.unwrap(), Some(vec![3]));

        let err = store.persist_snapshot("draft-1", &snapshot(3)).await.unwrap_err();
        assert!(matches!(err, CollabError::Persistence(_)));
        assert_eq!(store.versions("draft-1").len(), 1);
    }

    #[tokio::test]
    async fn open_store_creates_documents_on_load() {
        let store = MemColab::open();
        assert!(store.check_permission("anything", &Identity::user("u9", "acme")).await.unwrap());
        assert_eq!(store.load_document_state("draft-9").await.unwrap(), None);
        assert_eq!(store.current_version("draft-9").await.unwrap(), Some(0));

        let strict = MemColab::new();
        assert!(matches!(
            strict.load_document_state("draft-9").await,
            Err(CollabError::NotFound(_))
        ));
    }
}

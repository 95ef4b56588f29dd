//! Collaborators the engine consumes but does not implement.

use async_trait::async_trait;

use crate::models::{CollabError, Identity, NewSnapshot, UserProfile};

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify an opaque bearer credential.
    async fn verify_credential(&self, token: &str) -> Result<Identity, CollabError>;
}

#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Whether `identity` may edit the document behind `room_id`.
    async fn check_permission(&self, room_id: &str, identity: &Identity) -> Result<bool, CollabError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Content of the current version, `None` when nothing was persisted yet.
    async fn load_document_state(&self, room_id: &str) -> Result<Option<Vec<u8>>, CollabError>;

    /// Current version pointer, `None` when the document has no record.
    async fn current_version(&self, room_id: &str) -> Result<Option<u32>, CollabError>;

    /// Write the version row and move the current-version pointer to
    /// `snapshot.version` as one atomic unit. Fails when the pointer is no
    /// longer at `snapshot.version - 1`.
    async fn persist_snapshot(&self, room_id: &str, snapshot: &NewSnapshot) -> Result<(), CollabError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve display data; unknown ids are simply absent from the result.
    async fn resolve_users(&self, ids: &[String]) -> Result<Vec<UserProfile>, CollabError>;
}

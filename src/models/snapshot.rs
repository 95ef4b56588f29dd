use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::CollabError;

/// A user credited with part of the changes folded into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub user_id: String,
    pub name: String,
    pub changes_count: u64,
}

/// Display data for a user, as returned by the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
}

/// A version row ready to be written by a `DocumentStore`.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub version: u32,
    pub content: Vec<u8>,
    pub plain_text: String,
    pub contributors: Vec<Contributor>,
    pub created_by: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stored form of the document content of a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPackage {
    pub snapshot: Vec<u8>,
    pub state_vector: Vec<u8>,
}

impl SnapshotPackage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CollabError> {
        serde_cbor::to_vec(self)
            .map_err(|e| CollabError::Persistence(format!("Failed to serialize SnapshotPackage: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CollabError> {
        serde_cbor::from_slice(bytes)
            .map_err(|e| CollabError::Persistence(format!("Failed to deserialize SnapshotPackage: {}", e)))
    }
}

/// Outcome of a successful materialization.
#[derive(Debug, Clone)]
pub struct SnapshotReceipt {
    pub room_id: String,
    pub version: u32,
    pub contributors: Vec<Contributor>,
    pub state_vector: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use utoipa::ToSchema;

use crate::models::{Contributor, SnapshotReceipt};

/// Request to materialize a room now
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct DocumentSnapshotRequest {
    pub description: Option<String>,
}

/// The version created by a snapshot
#[serde_as]
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshotResponse {
    pub room_id: String,
    pub version: u32,
    pub contributors: Vec<Contributor>,
    /// Base64 encoded state vector of the persisted content
    #[serde_as(as = "Base64")]
    #[schema(value_type = String)]
    pub state_vector: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl From<SnapshotReceipt> for DocumentSnapshotResponse {
    fn from(receipt: SnapshotReceipt) -> Self {
        Self {
            room_id: receipt.room_id,
            version: receipt.version,
            contributors: receipt.contributors,
            state_vector: receipt.state_vector,
            created_at: receipt.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_vector_is_base64() {
        let response = DocumentSnapshotResponse {
            room_id: "draft-1".into(),
            version: 3,
            contributors: Vec::new(),
            state_vector: vec![1, 2, 3],
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["stateVector"], "AQID");
        assert_eq!(json["roomId"], "draft-1");
    }
}

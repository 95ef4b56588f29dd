use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for an error
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: u16,
    pub status: String,
    pub error: String,
}

impl ErrorResponse {
    pub fn from_status(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
        (status, Json(ErrorResponse {
            code: status.as_u16(),
            status: status.to_string(),
            error: error.into(),
        }))
    }
}

/// Close code sent when the credential is missing or invalid (retry with a new token).
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4001;
/// Close code sent when the identity is valid but may not join the room.
pub const CLOSE_PERMISSION_DENIED: u16 = 4003;
/// Close code sent when no pong arrived between two pings.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4008;
/// Close code sent after too many malformed frames.
pub const CLOSE_PROTOCOL_VIOLATION: u16 = 1002;
/// Close code sent when the room could not be loaded.
pub const CLOSE_ROOM_UNAVAILABLE: u16 = 1011;
/// Close code sent when the connection names no room.
pub const CLOSE_ROOM_REQUIRED: u16 = 4004;

/// Errors raised by the collaboration engine.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("access denied: {0}")]
    Authorization(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("document '{0}' not found")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl CollabError {
    /// WebSocket close code used when this error terminates a connection.
    pub fn close_code(&self) -> u16 {
        match self {
            CollabError::Authentication(_) => CLOSE_AUTHENTICATION_FAILED,
            CollabError::Authorization(_) => CLOSE_PERMISSION_DENIED,
            CollabError::Protocol(_) => CLOSE_PROTOCOL_VIOLATION,
            CollabError::NotFound(_) | CollabError::Persistence(_) => CLOSE_ROOM_UNAVAILABLE,
        }
    }

    /// Short, stable close reason matching `close_code`.
    pub fn close_reason(&self) -> &'static str {
        match self {
            CollabError::Authentication(_) => "authentication-failed",
            CollabError::Authorization(_) => "permission-denied",
            CollabError::Protocol(_) => "protocol-violation",
            CollabError::NotFound(_) | CollabError::Persistence(_) => "room-unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CollabError::Authentication(_) => StatusCode::UNAUTHORIZED,
            CollabError::Authorization(_) => StatusCode::FORBIDDEN,
            CollabError::Protocol(_) => StatusCode::BAD_REQUEST,
            CollabError::NotFound(_) => StatusCode::NOT_FOUND,
            CollabError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        ErrorResponse::from_status(self.status_code(), self.to_string())
    }
}

impl From<sqlx::Error> for CollabError {
    fn from(e: sqlx::Error) -> Self {
        CollabError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_and_authorization_close_codes_differ() {
        let authn = CollabError::Authentication("expired".into());
        let authz = CollabError::Authorization("no edit".into());
        assert_ne!(authn.close_code(), authz.close_code());
        assert_eq!(authn.close_code(), CLOSE_AUTHENTICATION_FAILED);
        assert_eq!(authz.close_reason(), "permission-denied");
    }

    #[test]
    fn not_found_maps_to_404() {
        let (status, body) = CollabError::NotFound("draft-1".into()).to_response();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, 404);
        assert_eq!(body.error, "document 'draft-1' not found");
    }
}

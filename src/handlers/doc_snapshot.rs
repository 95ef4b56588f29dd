use crate::{
    auth::auth,
    models::{DocumentSnapshotRequest, DocumentSnapshotResponse, ErrorResponse, Identity, TokenKind},
    AppState,
};
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

const APP_SERVICE_NAME: &str = "colabri-app";

/// Materialize a room as a new version right away
pub async fn doc_snapshot(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Extension(identity): Extension<Identity>,
    body: Option<Json<DocumentSnapshotRequest>>,
) -> Result<(StatusCode, Json<DocumentSnapshotResponse>), (StatusCode, Json<ErrorResponse>)> {
    let room_id = room_id.trim_start_matches('/').to_string();
    let description = body.and_then(|Json(req)| req.description);

    // 1. The app service may snapshot any room, users need edit permission
    let by_prpl = if identity.kind == TokenKind::Service {
        auth::ensure_service(&identity, APP_SERVICE_NAME)?
    } else {
        match state.permissions.check_permission(&room_id, &identity).await {
            Ok(true) => identity.subject.clone(),
            Ok(false) => {
                return Err(ErrorResponse::from_status(
                    StatusCode::FORBIDDEN,
                    format!("{} may not edit {}", identity.principal(), room_id),
                ))
            }
            Err(e) => return Err(e.to_response()),
        }
    };

    // 2. Load the room if nobody is editing it right now
    let room = state.registry.get_or_create(&room_id);
    if let Err(e) = room.ensure_loaded(state.store.as_ref()).await {
        error!("Failed to load room {} for snapshot: {}", room_id, e);
        return Err(e.to_response());
    }

    // 3. Materialize
    match state.snapshots.materialize(&room, &by_prpl, description).await {
        Ok(receipt) => {
            info!("Manual snapshot of {} by {}: version {}", room_id, by_prpl, receipt.version);
            Ok((StatusCode::CREATED, Json(receipt.into())))
        }
        Err(e) => {
            error!("Manual snapshot of {} failed: {}", room_id, e);
            Err(e.to_response())
        }
    }
}

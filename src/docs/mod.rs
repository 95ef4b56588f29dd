use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Room and host statistics, cloud admins only
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics", body = DiagnosticsResponse),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Cloud Admin access required", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Materialize a room as a new version
#[utoipa::path(
    post,
    path = "/api/v1/snapshots/{room_id}",
    params(
        ("room_id" = String, Path, description = "Room to snapshot, may contain '/'")
    ),
    request_body = DocumentSnapshotRequest,
    responses(
        (status = 201, description = "Version created", body = DocumentSnapshotResponse),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "No edit permission", body = ErrorResponse),
        (status = 404, description = "Document has no record", body = ErrorResponse),
        (status = 500, description = "Persisting the version failed", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn doc_snapshot_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        doc_snapshot_doc,
    ),
    components(
        schemas(
            HealthResponse,
            DiagnosticsResponse,
            DocumentSnapshotRequest,
            DocumentSnapshotResponse,
            Contributor,
            ErrorResponse
        )
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;

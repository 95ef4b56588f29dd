use axum::{http::StatusCode, Json};

use crate::models::{ErrorResponse, Identity};

const CLOUD_ADMIN_PRPL: &str = "r/Colabri-CloudAdmin";

pub fn is_cloud_admin(prpls: &[String]) -> bool {
    prpls.iter().any(|p| p == CLOUD_ADMIN_PRPL)
}

pub fn is_service(prpls: &[String], service_name: &str) -> bool {
    let service_prpl = format!("s/{}", service_name);
    prpls.iter().any(|p| p == &service_prpl)
}

pub fn ensure_service(identity: &Identity, service_name: &str) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    let prpls = identity.principals();
    if is_service(&prpls, service_name) {
        return Ok(format!("s/{}", service_name));
    }

    if is_cloud_admin(&prpls) {
        return Ok(CLOUD_ADMIN_PRPL.to_string());
    }

    Err(ErrorResponse::from_status(
        StatusCode::FORBIDDEN,
        format!("Service '{}' access denied", service_name),
    ))
}

pub fn ensure_cloud_admin(identity: &Identity) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    if is_cloud_admin(&identity.principals()) {
        return Ok(CLOUD_ADMIN_PRPL.to_string());
    }

    Err(ErrorResponse::from_status(
        StatusCode::FORBIDDEN,
        "Cloud Admin access required",
    ))
}

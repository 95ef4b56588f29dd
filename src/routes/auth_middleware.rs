use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::services::auth_service::get_auth_token;
use crate::AppState;

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {

    // 1. Get the auth token from the request
    let token = match get_auth_token(req.headers()) {
        Ok(token) => token,
        Err(_) => return Err(StatusCode::UNAUTHORIZED),
    };

    // 2. Validate the token and turn it into an identity
    let identity = match state.verifier.verify_credential(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            error!("{}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };
    info!("Request authenticated as {}", identity.principal());

    // 3. Make the identity available to downstream handlers
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

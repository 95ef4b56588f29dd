pub mod api;
pub mod auth_middleware;

use axum::{http::HeaderValue, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::docs::ApiDoc;
use crate::websocket::handler::{collab_ws_path, collab_ws_query};
use crate::AppState;

pub use api::create_api_routes;

/// The full application: collaboration endpoint, REST API and Swagger UI
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/collab", get(collab_ws_query))
        .route("/collab/*room_id", get(collab_ws_path))
        // Mount API routes
        .nest("/api", create_api_routes(state.clone()))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Tracing outermost, then CORS
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(state.config.cors_origins.as_deref())),
        )
        .with_state(state)
}

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origins {
        None | Some("*") | Some("") => base.allow_origin(Any),
        Some(list) => {
            let parsed: Vec<HeaderValue> = list
                .split(',')
                .filter_map(|o| match o.trim().parse() {
                    Ok(origin) => Some(origin),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin '{}'", o);
                        None
                    }
                })
                .collect();
            base.allow_origin(parsed)
        }
    }
}

use colabri_sync::clients::app_service_client::AppServiceClient;
use colabri_sync::config::Config;
use colabri_sync::db::{dbcolab::DbColab, memcolab::MemColab};
use colabri_sync::services::auth_service::JwtVerifier;
use colabri_sync::services::ports::{DocumentStore, PermissionChecker, UserDirectory};
use colabri_sync::ws::registry::spawn_sweeper;
use colabri_sync::ws::userctx::{CachedUserDirectory, NoopDirectory};
use colabri_sync::{create_app, AppState};
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "colabri_sync=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    if let Some(pod) = &config.cloud_pod {
        info!("Running as {} on pod {}", config.cloud_service_name, pod);
    }

    // Token verification needs the shared secret
    let Some(jwt_secret) = config.cloud_auth_jwt_secret.clone() else {
        error!("No JWT secret configured! Set CLOUD_AUTH_JWT_SECRET.");
        return;
    };
    let verifier = Arc::new(JwtVerifier::new(jwt_secret.clone()));

    // Contributor names come from the app service when it is configured
    let users: Arc<dyn UserDirectory> = match &config.app_service_url {
        Some(url) => match AppServiceClient::new(url.clone(), jwt_secret, config.cloud_service_name.clone()) {
            Ok(client) => Arc::new(CachedUserDirectory::new(client)),
            Err(e) => {
                error!("Failed to create app service client: {}", e);
                Arc::new(NoopDirectory)
            }
        },
        None => {
            warn!("No app service URL configured - contributors are listed by id");
            Arc::new(NoopDirectory)
        }
    };

    // Initialize the document store
    let (permissions, store): (Arc<dyn PermissionChecker>, Arc<dyn DocumentStore>) = match &config.db_url {
        Some(db_url) => match DbColab::new(db_url).await {
            Ok(db) => {
                info!("Database initialized successfully");
                let db = Arc::new(db);
                (db.clone() as Arc<dyn PermissionChecker>, db as Arc<dyn DocumentStore>)
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                return;
            }
        },
        None => {
            warn!("No database URL configured - documents are kept in memory and every user may edit");
            let mem = Arc::new(MemColab::open());
            (mem.clone() as Arc<dyn PermissionChecker>, mem as Arc<dyn DocumentStore>)
        }
    };

    let state = Arc::new(AppState::new(config.clone(), verifier, permissions, store, users));

    // Unload rooms nobody uses
    if let Some(ttl) = config.room_idle_ttl() {
        spawn_sweeper(state.registry.clone(), ttl, config.system_principal());
    }

    let app = create_app(state);

    // Start the HTTP and WebSocket server
    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            return;
        }
    };

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/collab", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }
    info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

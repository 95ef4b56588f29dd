pub mod auth;
pub mod clients;
pub mod config;
pub mod db;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
pub mod websocket;
pub mod ws;

use std::sync::Arc;

use config::Config;
use services::change_tracker::ChangeTracker;
use services::ports::{CredentialVerifier, DocumentStore, PermissionChecker, UserDirectory};
use services::snapshot_service::SnapshotService;
use ws::registry::RoomRegistry;

pub use routes::create_app;

/// Shared state of the server
pub struct AppState {
    pub config: Config,
    pub registry: Arc<RoomRegistry>,
    pub tracker: Arc<ChangeTracker>,
    pub snapshots: Arc<SnapshotService>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub permissions: Arc<dyn PermissionChecker>,
    pub store: Arc<dyn DocumentStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        verifier: Arc<dyn CredentialVerifier>,
        permissions: Arc<dyn PermissionChecker>,
        store: Arc<dyn DocumentStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let tracker = Arc::new(ChangeTracker::new(config.snapshot_thresholds(), users));
        let snapshots = Arc::new(SnapshotService::new(store.clone(), tracker.clone()));
        let registry = Arc::new(RoomRegistry::new(tracker.clone(), snapshots.clone()));
        Self {
            config,
            registry,
            tracker,
            snapshots,
            verifier,
            permissions,
            store,
        }
    }
}

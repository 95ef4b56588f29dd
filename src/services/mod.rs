pub mod auth_service;
pub mod change_tracker;
pub mod ports;
pub mod snapshot_service;

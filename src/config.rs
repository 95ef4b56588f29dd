use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::services::change_tracker::SnapshotThresholds;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Cloud service identifiers
    #[serde(default = "default_service_name")]
    pub cloud_service_name: String,
    pub cloud_pod: Option<String>,

    /// JWT secret key
    pub cloud_auth_jwt_secret: Option<String>,

    /// Database URL
    pub db_url: Option<String>,

    /// App service base URL, used to resolve contributor names
    pub app_service_url: Option<String>,

    /// Seconds between heartbeat pings
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Seconds after the last snapshot before pending changes are materialized
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// Change units that trigger a snapshot regardless of time
    #[serde(default = "default_snapshot_change_threshold")]
    pub snapshot_change_threshold: u64,

    /// Malformed frames tolerated before a connection is closed
    #[serde(default = "default_max_protocol_violations")]
    pub max_protocol_violations: u32,

    /// Frames queued per connection before it counts as a slow consumer
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Seconds a room without connections stays loaded, 0 keeps rooms forever
    #[serde(default = "default_room_idle_ttl_secs")]
    pub room_idle_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn room_idle_ttl(&self) -> Option<Duration> {
        (self.room_idle_ttl_secs > 0).then(|| Duration::from_secs(self.room_idle_ttl_secs))
    }

    pub fn snapshot_thresholds(&self) -> SnapshotThresholds {
        SnapshotThresholds {
            interval: chrono::Duration::seconds(self.snapshot_interval_secs as i64),
            change_threshold: self.snapshot_change_threshold,
        }
    }

    /// Principal used for snapshots the service takes on its own
    pub fn system_principal(&self) -> String {
        format!("s/{}", self.cloud_service_name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            cloud_service_name: default_service_name(),
            cloud_pod: None,
            cloud_auth_jwt_secret: None,
            db_url: None,
            app_service_url: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            snapshot_change_threshold: default_snapshot_change_threshold(),
            max_protocol_violations: default_max_protocol_violations(),
            outbound_buffer: default_outbound_buffer(),
            room_idle_ttl_secs: default_room_idle_ttl_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "colabri-sync".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_snapshot_interval_secs() -> u64 {
    300
}

fn default_snapshot_change_threshold() -> u64 {
    100
}

fn default_max_protocol_violations() -> u32 {
    5
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_room_idle_ttl_secs() -> u64 {
    1800
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_values_override_defaults() {
        let vars = vec![
            ("PORT".to_string(), "4100".to_string()),
            ("HEARTBEAT_INTERVAL_SECS".to_string(), "5".to_string()),
            ("ROOM_IDLE_TTL_SECS".to_string(), "0".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();
        assert_eq!(config.port, 4100);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.room_idle_ttl(), None);
        assert_eq!(config.snapshot_change_threshold, 100);
        assert_eq!(config.system_principal(), "s/colabri-sync");
        assert_eq!(config.snapshot_thresholds().interval, chrono::Duration::minutes(5));
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub ratelimit: RateLimitConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds (server sends a heartbeat frame)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Connection timeout in seconds (swept if no activity)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Stale sweep interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Maximum inbound text frame size in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Maximum room id length in characters
    #[serde(default = "default_max_room_id_length")]
    pub max_room_id_length: usize,
}

/// Sliding-window rate limits per event type.
///
/// Each limit is the maximum number of granted events inside the
/// trailing window for one subject (IP or user).
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Connection attempts per IP per minute
    #[serde(default = "default_connects_per_minute")]
    pub connects_per_minute: u32,
    /// Room joins per user per minute
    #[serde(default = "default_joins_per_minute")]
    pub joins_per_minute: u32,
    /// Relayed events (chat/operation/cursor) per user per relay window
    #[serde(default = "default_relays_per_window")]
    pub relays_per_window: u32,
    /// Relay window length in seconds
    #[serde(default = "default_relay_window_seconds")]
    pub relay_window_seconds: u64,
    /// Idle buckets older than this are garbage collected
    #[serde(default = "default_bucket_ttl_seconds")]
    pub bucket_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceConfig {
    /// Samples retained per operation
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,
    /// Aggregation window for snapshots, in seconds
    #[serde(default = "default_snapshot_window_seconds")]
    pub snapshot_window_seconds: u64,
    /// Threshold applied to operations without an explicit entry, in ms
    #[serde(default = "default_threshold_ms")]
    pub default_threshold_ms: u64,
    /// Per-operation thresholds in ms (e.g. collaboration_operation = 100)
    #[serde(default)]
    pub thresholds_ms: HashMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Fan-out bus backend ("local" is the only in-tree backend)
    #[serde(default = "default_bus_backend")]
    pub backend: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_connection_timeout() -> u64 {
    120 // 2 minutes
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

fn default_max_payload_bytes() -> usize {
    64 * 1024
}

fn default_max_room_id_length() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_connects_per_minute() -> u32 {
    30
}

fn default_joins_per_minute() -> u32 {
    60
}

fn default_relays_per_window() -> u32 {
    120
}

fn default_relay_window_seconds() -> u64 {
    10
}

fn default_bucket_ttl_seconds() -> u64 {
    300
}

fn default_sample_capacity() -> usize {
    1000
}

fn default_snapshot_window_seconds() -> u64 {
    300
}

fn default_threshold_ms() -> u64 {
    100
}

fn default_bus_backend() -> String {
    "local".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8082)?
            .set_default("websocket.heartbeat_interval", 30)?
            .set_default("websocket.connection_timeout", 120)?
            .set_default("websocket.cleanup_interval", 60)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_HOST, SERVER_PORT, JWT_SECRET, RATELIMIT_ENABLED, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
            cleanup_interval: default_cleanup_interval(),
            max_payload_bytes: default_max_payload_bytes(),
            max_room_id_length: default_max_room_id_length(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            connects_per_minute: default_connects_per_minute(),
            joins_per_minute: default_joins_per_minute(),
            relays_per_window: default_relays_per_window(),
            relay_window_seconds: default_relay_window_seconds(),
            bucket_ttl_seconds: default_bucket_ttl_seconds(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            sample_capacity: default_sample_capacity(),
            snapshot_window_seconds: default_snapshot_window_seconds(),
            default_threshold_ms: default_threshold_ms(),
            thresholds_ms: HashMap::new(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: default_bus_backend(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8082);

        let ws = WebSocketConfig::default();
        assert_eq!(ws.connection_timeout, 120);
        assert_eq!(ws.max_room_id_length, 64);

        let limits = RateLimitConfig::default();
        assert!(limits.enabled);
        assert_eq!(limits.relay_window_seconds, 10);
    }
}

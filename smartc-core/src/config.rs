use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Frame bytes reserved for the request envelope around a signal payload:
/// op, request id, ids, username and field headers
pub const ENVELOPE_HEADROOM: usize = 512;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub hub: HubConfig,
    pub mesh: MeshConfig,
    pub codec: CodecConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Largest accepted WebSocket frame in bytes. Must leave
    /// [`ENVELOPE_HEADROOM`] above `hub.max_signal_bytes`.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 5001,
            max_message_size: 2048,
        }
    }
}

/// Connection registry and session directory limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Maximum active connections (0 = unlimited)
    pub max_connections: usize,
    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,
    /// Maximum members per session (0 = unlimited)
    pub max_peers_per_session: usize,
    /// Upper bound on free records kept for reuse
    pub pool_capacity: usize,
    /// Largest signal payload accepted by `SendSignal`/`BroadcastSignal`
    pub max_signal_bytes: usize,
    pub sweep_interval_secs: u64,
    pub inactivity_timeout_secs: u64,
    /// Per-connection outbound queue depth
    pub outbound_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 0,
            max_sessions: 0,
            max_peers_per_session: 0,
            pool_capacity: 10_000,
            max_signal_bytes: 1024,
            sweep_interval_secs: 30,
            inactivity_timeout_secs: 120,
            outbound_buffer: 256,
        }
    }
}

impl HubConfig {
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    #[must_use]
    pub const fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

/// Adaptive mesh thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Cap on direct peers handed out in a routing path
    pub max_direct_peers: usize,
    /// Direct peers kept alongside relays once a session is relay based
    pub relay_based_direct_peers: usize,
    /// Largest session routed as a full mesh
    pub full_mesh_limit: usize,
    /// Largest session routed as hybrid; broadcast switches to relays at this size
    pub relay_threshold: usize,
    pub hybrid_relay_ratio: f64,
    pub relay_ratio: f64,
    pub min_relays: usize,
    /// Relay nodes returned in a routing path
    pub max_routed_relays: usize,
    pub maintenance_interval_secs: u64,
    pub stale_timeout_secs: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_direct_peers: 8,
            relay_based_direct_peers: 2,
            full_mesh_limit: 20,
            relay_threshold: 50,
            hybrid_relay_ratio: 0.05,
            relay_ratio: 0.10,
            min_relays: 3,
            max_routed_relays: 3,
            maintenance_interval_secs: 60,
            stale_timeout_secs: 300,
        }
    }
}

impl MeshConfig {
    #[must_use]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    #[must_use]
    pub const fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub keyframe_interval: u32,
    /// `very_low`, `low`, `medium`, `high` or `very_high`
    pub default_quality: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            keyframe_interval: 30,
            default_quality: "medium".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // SMARTC_HUB__MAX_CONNECTIONS, SMARTC_SERVER__HTTP_PORT, ...
        builder = builder.add_source(
            Environment::with_prefix("SMARTC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for containers)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// HTTP/WebSocket bind address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check for settings the server cannot run with.
    ///
    /// Returns every problem found rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if self.server.max_message_size == 0 {
            errors.push("server.max_message_size must be non-zero".to_string());
        }
        if self.hub.pool_capacity == 0 {
            errors.push("hub.pool_capacity must be non-zero".to_string());
        }
        if self.hub.outbound_buffer == 0 {
            errors.push("hub.outbound_buffer must be non-zero".to_string());
        }
        if self.hub.max_signal_bytes == 0 {
            errors.push("hub.max_signal_bytes must be non-zero".to_string());
        }
        if self.server.max_message_size < self.hub.max_signal_bytes + ENVELOPE_HEADROOM {
            errors.push(format!(
                "server.max_message_size ({}) must be at least hub.max_signal_bytes ({}) + {ENVELOPE_HEADROOM}",
                self.server.max_message_size, self.hub.max_signal_bytes
            ));
        }
        if self.hub.sweep_interval_secs == 0 {
            errors.push("hub.sweep_interval_secs must be non-zero".to_string());
        }
        if self.hub.sweep_interval_secs > self.hub.inactivity_timeout_secs {
            errors.push(format!(
                "hub.sweep_interval_secs ({}) exceeds hub.inactivity_timeout_secs ({})",
                self.hub.sweep_interval_secs, self.hub.inactivity_timeout_secs
            ));
        }
        if self.mesh.maintenance_interval_secs == 0 {
            errors.push("mesh.maintenance_interval_secs must be non-zero".to_string());
        }
        if self.mesh.maintenance_interval_secs > self.mesh.stale_timeout_secs {
            errors.push(format!(
                "mesh.maintenance_interval_secs ({}) exceeds mesh.stale_timeout_secs ({})",
                self.mesh.maintenance_interval_secs, self.mesh.stale_timeout_secs
            ));
        }
        if self.mesh.full_mesh_limit >= self.mesh.relay_threshold {
            errors.push(format!(
                "mesh.full_mesh_limit ({}) must be below mesh.relay_threshold ({})",
                self.mesh.full_mesh_limit, self.mesh.relay_threshold
            ));
        }
        for (name, ratio) in [
            ("mesh.hybrid_relay_ratio", self.mesh.hybrid_relay_ratio),
            ("mesh.relay_ratio", self.mesh.relay_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                errors.push(format!("{name} must be in (0, 1], got {ratio}"));
            }
        }
        if self.codec.keyframe_interval == 0 {
            errors.push("codec.keyframe_interval must be non-zero".to_string());
        }
        if !matches!(
            self.codec.default_quality.as_str(),
            "very_low" | "low" | "medium" | "high" | "very_high"
        ) {
            errors.push(format!(
                "codec.default_quality '{}' is not a known quality level",
                self.codec.default_quality
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format '{}' must be 'json' or 'pretty'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

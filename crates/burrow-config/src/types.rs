//! Configuration type definitions for server, auth, metrics, and logging.

use serde::{Deserialize, Serialize};

use crate::defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:4300`.
    pub listen: String,
    /// Path to the server RSA key (PKCS#8 PEM); generated on first start.
    pub key_path: String,
    /// Cipher methods offered to clients, preference order first.
    pub link_encrypt_methods: Vec<String>,
    /// Optional outer cipher applied before any protocol byte.
    #[serde(default)]
    pub global_encrypt_method: Option<String>,
    /// Password for the outer cipher; required iff the method is set.
    #[serde(default)]
    pub global_encrypt_password: Option<String>,
    /// Idle session expiry in seconds (0 = sessions never expire).
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Per-phase handshake timeout in seconds.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Remote dial timeout in seconds.
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
    /// Maximum concurrent client connections (None = unlimited).
    #[serde(default)]
    pub max_connections: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Path to the user database (TOML `[[users]]` entries).
    pub user_db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    /// Prometheus exporter listen address; None disables the exporter.
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    pub output: Option<String>,
    /// Per-module log level filters.
    #[serde(default)]
    pub filters: std::collections::HashMap<String, String>,
}

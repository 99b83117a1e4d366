//! CLI override flags, applied on top of the loaded config file.

use clap::Parser;

use crate::Config;

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Override server listen address, e.g. 0.0.0.0:4300
    #[arg(long)]
    pub listen: Option<String>,
    /// Override RSA key path
    #[arg(long)]
    pub key_path: Option<String>,
    /// Override user database path
    #[arg(long)]
    pub user_db: Option<String>,
    /// Override offered cipher methods (repeatable or comma-separated)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub link_encrypt_methods: Option<Vec<String>>,
    /// Override global cipher method
    #[arg(long)]
    pub global_encrypt_method: Option<String>,
    /// Override global cipher password
    #[arg(long)]
    pub global_encrypt_password: Option<String>,
    /// Override session idle expiry in seconds (0 = never)
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,
    /// Override maximum concurrent connections (0 = unlimited)
    #[arg(long)]
    pub max_connections: Option<usize>,
    /// Override metrics listen address
    #[arg(long)]
    pub metrics_listen: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
}

pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(v) = &overrides.listen {
        config.server.listen = v.clone();
    }
    if let Some(v) = &overrides.key_path {
        config.server.key_path = v.clone();
    }
    if let Some(v) = &overrides.user_db {
        config.auth.user_db_path = v.clone();
    }
    if let Some(v) = &overrides.link_encrypt_methods {
        config.server.link_encrypt_methods = v.clone();
    }
    if let Some(v) = &overrides.global_encrypt_method {
        config.server.global_encrypt_method = Some(v.clone());
    }
    if let Some(v) = &overrides.global_encrypt_password {
        config.server.global_encrypt_password = Some(v.clone());
    }
    if let Some(v) = overrides.session_ttl_secs {
        config.server.session_ttl_secs = v;
    }
    if let Some(v) = overrides.max_connections {
        config.server.max_connections = if v == 0 { None } else { Some(v) };
    }
    if let Some(v) = &overrides.metrics_listen {
        config.metrics.listen = Some(v.clone());
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
}

//! Configuration validation logic.

use burrow_crypto::CipherMethod;

use crate::loader::ConfigError;
use crate::Config;

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.listen.trim().is_empty() {
        return Err(ConfigError::Validation("server.listen is empty".into()));
    }
    if config.server.key_path.trim().is_empty() {
        return Err(ConfigError::Validation("server.key_path is empty".into()));
    }
    if config.server.link_encrypt_methods.is_empty() {
        return Err(ConfigError::Validation(
            "server.link_encrypt_methods is empty".into(),
        ));
    }
    for method in &config.server.link_encrypt_methods {
        if CipherMethod::named(method).is_none() {
            return Err(ConfigError::Validation(format!(
                "server.link_encrypt_methods: unknown method '{}'",
                method
            )));
        }
    }
    match (
        &config.server.global_encrypt_method,
        &config.server.global_encrypt_password,
    ) {
        (Some(method), password) => {
            if CipherMethod::named(method).is_none() {
                return Err(ConfigError::Validation(format!(
                    "server.global_encrypt_method: unknown method '{}'",
                    method
                )));
            }
            if password.as_deref().unwrap_or("").is_empty() {
                return Err(ConfigError::Validation(
                    "server.global_encrypt_password is required with global_encrypt_method".into(),
                ));
            }
        }
        (None, Some(_)) => {
            return Err(ConfigError::Validation(
                "server.global_encrypt_password set without global_encrypt_method".into(),
            ));
        }
        (None, None) => {}
    }
    if config.auth.user_db_path.trim().is_empty() {
        return Err(ConfigError::Validation("auth.user_db_path is empty".into()));
    }
    if config.server.handshake_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.handshake_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.dial_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.dial_timeout_secs must be > 0".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuthConfig, LoggingConfig, MetricsConfig, ServerConfig};

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                listen: "127.0.0.1:4300".into(),
                key_path: "key.pem".into(),
                link_encrypt_methods: vec!["aes-256-cfb".into()],
                global_encrypt_method: None,
                global_encrypt_password: None,
                session_ttl_secs: 3600,
                handshake_timeout_secs: 30,
                dial_timeout_secs: 10,
                max_connections: None,
            },
            auth: AuthConfig {
                user_db_path: "users.toml".into(),
            },
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        validate_config(&base_config()).unwrap();
    }

    #[test]
    fn empty_methods_rejected() {
        let mut config = base_config();
        config.server.link_encrypt_methods.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn unknown_method_rejected() {
        let mut config = base_config();
        config.server.link_encrypt_methods = vec!["rot13".into()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn global_method_requires_password() {
        let mut config = base_config();
        config.server.global_encrypt_method = Some("rc4".into());
        assert!(validate_config(&config).is_err());

        config.server.global_encrypt_password = Some("pw".into());
        validate_config(&config).unwrap();
    }

    #[test]
    fn orphan_global_password_rejected() {
        let mut config = base_config();
        config.server.global_encrypt_password = Some("pw".into());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn zero_timeouts_rejected() {
        let mut config = base_config();
        config.server.handshake_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = base_config();
        config.server.dial_timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }
}

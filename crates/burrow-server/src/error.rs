//! Server error types.

use burrow_auth::AuthError;
use burrow_config::ConfigError;
use burrow_crypto::CryptoError;
use burrow_metrics::{ERROR_AUTH, ERROR_CONFIG, ERROR_CRYPTO, ERROR_PROTOCOL, ERROR_TRANSPORT};
use burrow_proto::ProtoError;

/// Server error type.
///
/// Client-scoped variants (`Transport`, `Protocol`, `Auth`,
/// `UnknownSession`, `HandshakeTimeout`) tear down one connection and are
/// never escalated; `Config` and startup `Crypto` errors abort the process.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
    #[error("protocol: {0}")]
    Protocol(#[from] ProtoError),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    #[error("auth: {0}")]
    Auth(#[from] AuthError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("unknown cipher method: {0}")]
    UnknownMethod(String),
    #[error("unknown session")]
    UnknownSession,
    #[error("handshake timed out")]
    HandshakeTimeout,
}

impl ServerError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Transport(_) | ServerError::HandshakeTimeout => ERROR_TRANSPORT,
            ServerError::Protocol(_) | ServerError::UnknownMethod(_) => ERROR_PROTOCOL,
            ServerError::Crypto(_) => ERROR_CRYPTO,
            ServerError::Auth(_) | ServerError::UnknownSession => ERROR_AUTH,
            ServerError::Config(_) => ERROR_CONFIG,
        }
    }
}

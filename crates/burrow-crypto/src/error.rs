//! Crypto error type.

/// Errors from cipher construction, key exchange, or the key store.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("unknown cipher method: {0}")]
    UnknownMethod(String),
    #[error("unknown dh group index: {0}")]
    UnknownGroup(u8),
    #[error("peer public value out of range")]
    PublicOutOfRange,
    #[error("cipher construction: {0}")]
    Cipher(String),
    #[error("key io: {0}")]
    Io(#[from] std::io::Error),
    #[error("key encoding: {0}")]
    KeyEncoding(String),
    #[error("rsa: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("signature rejected")]
    BadSignature,
}

//! Authentication error types.

/// Authentication error.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown user or wrong password; callers must not distinguish.
    #[error("invalid credential")]
    Invalid,

    /// Backend error (file read, parse, etc.).
    #[error("backend error: {0}")]
    Backend(String),
}

impl AuthError {
    /// Create a backend error from any error type.
    #[inline]
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}

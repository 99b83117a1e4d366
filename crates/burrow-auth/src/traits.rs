//! User database trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AuthError;

/// Trait for user databases.
///
/// Implementations must be thread-safe (`Send + Sync`); verification runs
/// concurrently from every client handshake. Implementations compare
/// passwords in constant time.
#[async_trait]
pub trait UserDb: Send + Sync {
    /// Verify a credential pair.
    ///
    /// Returns [`AuthError::Invalid`] for unknown users and wrong passwords
    /// alike; callers surface a single indistinct failure to the client.
    async fn verify(&self, username: &str, password: &[u8]) -> Result<(), AuthError>;
}

/// Blanket implementation for `Arc<D>` where `D: UserDb`.
#[async_trait]
impl<D: UserDb + ?Sized> UserDb for Arc<D> {
    #[inline]
    async fn verify(&self, username: &str, password: &[u8]) -> Result<(), AuthError> {
        (**self).verify(username, password).await
    }
}

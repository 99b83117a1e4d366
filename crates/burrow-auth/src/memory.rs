//! In-memory user database.

use std::collections::HashMap;

use async_trait::async_trait;
use subtle::ConstantTimeEq;

use crate::error::AuthError;
use crate::traits::UserDb;

/// Simple in-memory user database.
///
/// Suitable for deployments with a fixed user file; pair with
/// [`ReloadableUserDb`](crate::ReloadableUserDb) for hot reload.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserDb {
    users: HashMap<String, String>,
}

impl MemoryUserDb {
    /// Create a new empty database.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from `(username, password)` pairs.
    pub fn from_users<I, U, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let users = pairs
            .into_iter()
            .map(|(u, p)| (u.into(), p.into()))
            .collect();
        Self { users }
    }

    /// Add or replace a user.
    #[inline]
    pub fn insert(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.users.insert(username.into(), password.into());
    }

    /// Number of registered users.
    #[inline]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check if no users are registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDb for MemoryUserDb {
    async fn verify(&self, username: &str, password: &[u8]) -> Result<(), AuthError> {
        let stored = self.users.get(username).ok_or(AuthError::Invalid)?;
        if password.ct_eq(stored.as_bytes()).into() {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}

//! Hot-reloadable user database wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::AuthError;
use crate::traits::UserDb;

/// A wrapper that allows hot-swapping the underlying user database.
///
/// Used by the SIGHUP handler to reload the user file without restarting
/// the server. `parking_lot::RwLock` does not poison on panic.
pub struct ReloadableUserDb {
    inner: RwLock<Arc<dyn UserDb>>,
}

impl ReloadableUserDb {
    /// Create a new reloadable database with the given initial backend.
    pub fn new<D: UserDb + 'static>(db: D) -> Self {
        Self {
            inner: RwLock::new(Arc::new(db)),
        }
    }

    /// Replace the backend. In-flight verifications complete against the
    /// old backend; new ones see the replacement.
    pub fn reload<D: UserDb + 'static>(&self, db: D) {
        let mut inner = self.inner.write();
        *inner = Arc::new(db);
    }

    /// Clone of the current backend Arc.
    #[inline]
    pub fn get(&self) -> Arc<dyn UserDb> {
        self.inner.read().clone()
    }
}

impl std::fmt::Debug for ReloadableUserDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadableUserDb").finish_non_exhaustive()
    }
}

#[async_trait]
impl UserDb for ReloadableUserDb {
    async fn verify(&self, username: &str, password: &[u8]) -> Result<(), AuthError> {
        // Clone the Arc so the lock is not held across await
        let backend = self.get();
        backend.verify(username, password).await
    }
}

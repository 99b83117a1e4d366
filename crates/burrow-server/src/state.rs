//! Shared server state.

use std::sync::Arc;
use std::time::Duration;

use burrow_auth::UserDb;
use burrow_crypto::{CipherMethod, GlobalCipherConfig, KeyStore};

use crate::session::SessionManager;

/// Immutable state shared by every client handler.
pub struct ServerState {
    /// Long-lived RSA signing key.
    pub keystore: KeyStore,
    /// Outer cipher wrapped around the raw stream, when configured.
    pub global_cipher: Option<GlobalCipherConfig>,
    /// Process-global session registry.
    pub sessions: Arc<SessionManager>,
    /// User database (hot-reloadable).
    pub users: Arc<dyn UserDb>,
    /// Offered link ciphers, preference order first.
    pub link_methods: Vec<&'static CipherMethod>,
    /// Comma-joined method names as sent in the hello.
    pub enc_methods: String,
    /// Upper bound on each handshake phase.
    pub handshake_timeout: Duration,
    /// Upper bound on dialing a remote for a logical connection.
    pub dial_timeout: Duration,
}

impl ServerState {
    /// Whether `name` is one of the offered link methods.
    pub fn offered_method(&self, name: &str) -> Option<&'static CipherMethod> {
        self.link_methods
            .iter()
            .copied()
            .find(|m| m.name == name)
    }
}

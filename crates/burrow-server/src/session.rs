//! Session identity and the process-global session registry.
//!
//! A session is created on successful login and lets the client reconnect
//! without re-running the key exchange: the resume HMAC is keyed by the
//! session's derived crypto key. Sessions are evicted by an idle sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use burrow_crypto::{CipherContext, CipherMethod};
use burrow_metrics::{record_sessions_expired, set_sessions_active};
use burrow_proto::SESSION_ID_LEN;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type SessionId = [u8; SESSION_ID_LEN];

/// Server-side session record; immutable after login except for the
/// last-used timestamp.
pub struct Session {
    pub id: SessionId,
    pub username: String,
    pub cipher_ctx: CipherContext,
    pub method: &'static CipherMethod,
    pub created_at: Instant,
    last_used: Mutex<Instant>,
}

impl Session {
    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &hex::encode(self.id))
            .field("username", &self.username)
            .field("method", &self.method.name)
            .finish_non_exhaustive()
    }
}

/// Thread-safe registry mapping session ids to live sessions.
///
/// Lookups are common (every resume), insertions rare (one per login);
/// a reader/writer lock fits the access pattern.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a fresh session for an authenticated user.
    pub fn create(
        &self,
        username: String,
        cipher_ctx: CipherContext,
        method: &'static CipherMethod,
    ) -> Arc<Session> {
        let mut sessions = self.sessions.write();
        let mut id = [0u8; SESSION_ID_LEN];
        loop {
            rand::thread_rng().fill_bytes(&mut id);
            if !sessions.contains_key(&id) {
                break;
            }
        }
        let now = Instant::now();
        let session = Arc::new(Session {
            id,
            username,
            cipher_ctx,
            method,
            created_at: now,
            last_used: Mutex::new(now),
        });
        sessions.insert(id, session.clone());
        set_sessions_active(sessions.len());
        session
    }

    /// Look up a session by id, refreshing its last-used timestamp.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.read().get(id).cloned();
        if let Some(session) = &session {
            session.touch();
        }
        session
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Evict sessions idle longer than `ttl`; returns the eviction count.
    pub fn sweep_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| session.idle_for(now) < ttl);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "idle sessions evicted");
            record_sessions_expired(removed as u64);
            set_sessions_active(sessions.len());
        }
        removed
    }

    /// Start the background idle sweep.
    pub fn start_sweep_task(
        self: &Arc<Self>,
        ttl: Duration,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("session sweep task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        manager.sweep_idle(ttl);
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.len())
            .finish()
    }
}

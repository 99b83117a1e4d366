//! Main server loop and connection handling.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use burrow_auth::UserDb;
use burrow_config::{Config, ConfigError};
use burrow_crypto::{CipherMethod, GlobalCipherConfig, KeyStore};
use burrow_metrics::{
    record_connection_accepted, record_connection_closed, record_connection_rejected,
    record_error,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::handshake::client_startup;
use crate::mux::run_tunnel;
use crate::pipe::SecureStream;
use crate::session::SessionManager;
use crate::state::ServerState;

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the idle-session sweep runs.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the server with a cancellation token for graceful shutdown.
pub async fn run_with_shutdown(
    config: Config,
    users: impl UserDb + 'static,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let state = build_state(&config, Arc::new(users), &shutdown)?;

    // Connection limiter (None or 0 = unlimited)
    let conn_limit: Option<Arc<Semaphore>> = config
        .server
        .max_connections
        .filter(|&n| n > 0)
        .map(|n| {
            info!("max_connections set to {}", n);
            Arc::new(Semaphore::new(n))
        });

    let listener = TcpListener::bind(&config.server.listen).await?;
    info!(address = %config.server.listen, "listening");

    // Every handler task is tracked so shutdown can drain them.
    let tracker = TaskTracker::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }

            result = listener.accept() => {
                let (tcp, peer) = result?;

                // Try to acquire a connection permit
                let permit: Option<OwnedSemaphorePermit> = match &conn_limit {
                    Some(sem) => match sem.clone().try_acquire_owned() {
                        Ok(p) => Some(p),
                        Err(_) => {
                            debug!(peer = %peer, reason = "max_connections", "connection rejected");
                            record_connection_rejected("max_connections");
                            drop(tcp);
                            continue;
                        }
                    },
                    None => None,
                };

                debug!(peer = %peer, "new connection");

                let state = state.clone();
                tracker.spawn(async move {
                    let _permit = permit; // hold permit until the connection closes
                    record_connection_accepted();
                    let start = Instant::now();

                    let result = process_client(state, tcp, peer).await;

                    let duration_secs = start.elapsed().as_secs_f64();
                    record_connection_closed(duration_secs);

                    match result {
                        Ok(()) => debug!(peer = %peer, duration_secs, "connection closed"),
                        Err(ServerError::Transport(ref err))
                            if err.kind() == io::ErrorKind::UnexpectedEof =>
                        {
                            debug!(peer = %peer, duration_secs, "client disconnected");
                        }
                        Err(err) => {
                            record_error(err.error_type());
                            warn!(peer = %peer, duration_secs, error = %err, "connection closed with error");
                        }
                    }
                });
            }
        }
    }

    // Graceful drain: wait for active connections
    tracker.close();
    let active = tracker.len();
    if active > 0 {
        info!("waiting for {} active connections to drain", active);
        match tokio::time::timeout(DEFAULT_SHUTDOWN_TIMEOUT, tracker.wait()).await {
            Ok(()) => info!("all connections drained"),
            Err(_) => warn!(
                "shutdown timeout, {} connections still active",
                tracker.len()
            ),
        }
    }

    info!("server stopped");
    Ok(())
}

/// Run the server (blocking until error, no graceful shutdown).
pub async fn run(config: Config, users: impl UserDb + 'static) -> Result<(), ServerError> {
    run_with_shutdown(config, users, CancellationToken::new()).await
}

/// Resolve startup configuration into shared state; all failures here are
/// fatal.
fn build_state(
    config: &Config,
    users: Arc<dyn UserDb>,
    shutdown: &CancellationToken,
) -> Result<Arc<ServerState>, ServerError> {
    if config.server.link_encrypt_methods.is_empty() {
        return Err(ConfigError::Validation("link_encrypt_methods is empty".into()).into());
    }
    let mut link_methods = Vec::with_capacity(config.server.link_encrypt_methods.len());
    for name in &config.server.link_encrypt_methods {
        let method = CipherMethod::named(name).ok_or_else(|| {
            ConfigError::Validation(format!("unknown cipher method '{}'", name))
        })?;
        link_methods.push(method);
    }
    let enc_methods = config.server.link_encrypt_methods.join(",");

    let keystore = KeyStore::load_or_generate(&config.server.key_path)?;

    let global_cipher = match (
        &config.server.global_encrypt_method,
        &config.server.global_encrypt_password,
    ) {
        (Some(method), Some(password)) => {
            Some(GlobalCipherConfig::new(method, password.as_bytes())?)
        }
        (Some(_), None) => {
            return Err(ConfigError::Validation(
                "global_encrypt_password is required with global_encrypt_method".into(),
            )
            .into());
        }
        _ => None,
    };

    let sessions = SessionManager::new();
    if config.server.session_ttl_secs > 0 {
        sessions.start_sweep_task(
            Duration::from_secs(config.server.session_ttl_secs),
            SESSION_SWEEP_INTERVAL,
            shutdown.child_token(),
        );
    }

    Ok(Arc::new(ServerState {
        keystore,
        global_cipher,
        sessions,
        users,
        link_methods,
        enc_methods,
        handshake_timeout: Duration::from_secs(config.server.handshake_timeout_secs),
        dial_timeout: Duration::from_secs(config.server.dial_timeout_secs),
    }))
}

/// Drive one client connection: cipher wrap, handshake, then the mux loop.
async fn process_client(
    state: Arc<ServerState>,
    tcp: TcpStream,
    peer: SocketAddr,
) -> Result<(), ServerError> {
    tcp.set_nodelay(true)?;

    let mut pipe = SecureStream::new(tcp);
    if let Some(global) = &state.global_cipher {
        pipe.switch_cipher(global.new_pair()?);
    }

    let session = client_startup(&state, &mut pipe).await?;
    debug!(peer = %peer, user = %session.username, "handshake complete");
    run_tunnel(state, session, pipe).await
}

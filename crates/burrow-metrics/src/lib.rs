//! Metrics collection and Prometheus exporter for the burrow server.
//!
//! Provides instrumentation for the tunnel: connection counts, handshake
//! and login outcomes, session-resume outcomes, open tunnels, and relayed
//! bytes.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize the Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
/// Returns an error message if binding fails.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Total number of TCP connections accepted.
pub const CONNECTIONS_TOTAL: &str = "burrow_connections_total";
/// Number of currently active client connections.
pub const CONNECTIONS_ACTIVE: &str = "burrow_connections_active";
/// Total number of connections rejected at accept.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "burrow_connections_rejected_total";
/// Connection duration histogram (seconds).
pub const CONNECTION_DURATION_SECONDS: &str = "burrow_connection_duration_seconds";
/// Total number of successful logins.
pub const LOGIN_SUCCESS_TOTAL: &str = "burrow_login_success_total";
/// Total number of failed logins.
pub const LOGIN_FAILURE_TOTAL: &str = "burrow_login_failure_total";
/// Total number of session resume attempts by outcome.
pub const SESSION_RESUME_TOTAL: &str = "burrow_session_resume_total";
/// Number of sessions currently registered.
pub const SESSIONS_ACTIVE: &str = "burrow_sessions_active";
/// Total number of sessions evicted by the idle sweep.
pub const SESSIONS_EXPIRED_TOTAL: &str = "burrow_sessions_expired_total";
/// Number of currently open logical connections across all tunnels.
pub const TUNNEL_CONNS_ACTIVE: &str = "burrow_tunnel_conns_active";
/// Total bytes relayed client -> remote.
pub const BYTES_UPSTREAM_TOTAL: &str = "burrow_bytes_upstream_total";
/// Total bytes relayed remote -> client.
pub const BYTES_DOWNSTREAM_TOTAL: &str = "burrow_bytes_downstream_total";
/// Total number of errors by type.
pub const ERRORS_TOTAL: &str = "burrow_errors_total";

// ============================================================================
// Error Type Constants
// ============================================================================

pub const ERROR_TRANSPORT: &str = "transport";
pub const ERROR_PROTOCOL: &str = "protocol";
pub const ERROR_CRYPTO: &str = "crypto";
pub const ERROR_AUTH: &str = "auth";
pub const ERROR_CONFIG: &str = "config";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a new connection accepted.
#[inline]
pub fn record_connection_accepted() {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a connection closed.
#[inline]
pub fn record_connection_closed(duration_secs: f64) {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS).record(duration_secs);
}

/// Record a rejected connection (reason: "max_connections").
#[inline]
pub fn record_connection_rejected(reason: &'static str) {
    counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record a successful login.
#[inline]
pub fn record_login_success() {
    counter!(LOGIN_SUCCESS_TOTAL).increment(1);
}

/// Record a failed login.
#[inline]
pub fn record_login_failure() {
    counter!(LOGIN_FAILURE_TOTAL).increment(1);
}

/// Record a session resume attempt (outcome: "success", "hmac_fail",
/// "unknown_session").
#[inline]
pub fn record_session_resume(outcome: &'static str) {
    counter!(SESSION_RESUME_TOTAL, "outcome" => outcome).increment(1);
}

/// Set the number of registered sessions.
#[inline]
pub fn set_sessions_active(count: usize) {
    gauge!(SESSIONS_ACTIVE).set(count as f64);
}

/// Record sessions evicted by the idle sweep.
#[inline]
pub fn record_sessions_expired(count: u64) {
    counter!(SESSIONS_EXPIRED_TOTAL).increment(count);
}

/// Record a logical connection opened.
#[inline]
pub fn record_tunnel_conn_opened() {
    gauge!(TUNNEL_CONNS_ACTIVE).increment(1.0);
}

/// Record a logical connection closed.
#[inline]
pub fn record_tunnel_conn_closed() {
    gauge!(TUNNEL_CONNS_ACTIVE).decrement(1.0);
}

/// Record bytes relayed client -> remote.
#[inline]
pub fn record_bytes_upstream(bytes: u64) {
    counter!(BYTES_UPSTREAM_TOTAL).increment(bytes);
}

/// Record bytes relayed remote -> client.
#[inline]
pub fn record_bytes_downstream(bytes: u64) {
    counter!(BYTES_DOWNSTREAM_TOTAL).increment(bytes);
}

/// Record an error by type.
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}

//! Default values and the serde default functions that forward to them.

/// Sessions idle longer than this are evicted; 0 disables the sweep.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
/// Upper bound on each handshake phase.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;
/// Upper bound on dialing a remote host for a logical connection.
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 10;

/// Generate default value functions for serde.
macro_rules! default_fns {
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                $const_name
            }
        )*
    };
}

default_fns! {
    default_session_ttl_secs       => DEFAULT_SESSION_TTL_SECS: u64,
    default_handshake_timeout_secs => DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64,
    default_dial_timeout_secs      => DEFAULT_DIAL_TIMEOUT_SECS: u64,
}

//! User database backends for the burrow server.
//!
//! The handshake engine authenticates `username / password` pairs against a
//! [`UserDb`]. The standard deployment loads a TOML user file into a
//! [`MemoryUserDb`] wrapped in a [`ReloadableUserDb`] so SIGHUP can swap in
//! fresh credentials without a restart.

mod error;
mod file;
mod memory;
mod reloadable;
mod traits;

pub use error::AuthError;
pub use file::load_users;
pub use memory::MemoryUserDb;
pub use reloadable::ReloadableUserDb;
pub use traits::UserDb;

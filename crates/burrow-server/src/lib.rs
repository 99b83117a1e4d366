//! Burrow tunnel server library.
//!
//! Exposes the server implementation for integration tests and embedding.

pub mod cli;
mod error;
mod handshake;
mod mux;
mod pipe;
mod server;
mod session;
mod state;

pub use cli::ServerArgs;
pub use error::ServerError;
pub use pipe::{SecureReader, SecureStream, SecureWriter};
pub use server::{run, run_with_shutdown, DEFAULT_SHUTDOWN_TIMEOUT};
pub use session::{Session, SessionManager};
pub use tokio_util::sync::CancellationToken;

//! Cryptographic building blocks for the burrow tunnel.
//!
//! - [`methods`]: the cipher-method registry mapping wire names to stream
//!   transform constructors.
//! - [`kdf`]: deterministic key/IV expansion shared by the DH exchange and
//!   the password-derived global cipher.
//! - [`dh`]: the Diffie-Hellman cipher context with its built-in MODP
//!   group bank.
//! - [`keystore`]: on-disk RSA key persistence and PKCS#1 v1.5 signing.
//! - [`global`]: the optional outer cipher wrapped around every connection.

mod error;
pub mod dh;
pub mod global;
pub mod kdf;
pub mod keystore;
pub mod methods;

pub use dh::CipherContext;
pub use error::CryptoError;
pub use global::GlobalCipherConfig;
pub use keystore::KeyStore;
pub use methods::{BoxTransform, CipherMethod, CipherPair, StreamTransform};

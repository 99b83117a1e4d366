//! Password-derived global cipher.
//!
//! When configured, every accepted connection is wrapped in this outer
//! cipher before a single protocol byte is read. It hides handshake
//! metadata from on-path observers; the inner key exchange provides the
//! actual session security.

use crate::error::CryptoError;
use crate::kdf::expand_key_iv;
use crate::methods::{CipherMethod, CipherPair};

/// Precomputed key material for the outer cipher; one fresh transform pair
/// is constructed per connection.
pub struct GlobalCipherConfig {
    method: &'static CipherMethod,
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl GlobalCipherConfig {
    /// Derive the outer cipher from a method name and the shared password.
    pub fn new(method_name: &str, password: &[u8]) -> Result<Self, CryptoError> {
        let method = CipherMethod::named(method_name)
            .ok_or_else(|| CryptoError::UnknownMethod(method_name.to_string()))?;
        let (key, iv) = expand_key_iv(password, method.key_size, method.iv_size);
        Ok(Self { method, key, iv })
    }

    pub fn method(&self) -> &'static CipherMethod {
        self.method
    }

    /// Fresh `(encryptor, decryptor)` pair at stream position zero.
    pub fn new_pair(&self) -> Result<CipherPair, CryptoError> {
        self.method.build(&self.key, &self.iv)
    }
}

impl std::fmt::Debug for GlobalCipherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalCipherConfig")
            .field("method", &self.method.name)
            .finish_non_exhaustive()
    }
}

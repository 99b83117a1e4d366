//! On-disk RSA key store.
//!
//! Loads the server's RSA-2048 key from a PKCS#8 PEM file, generating and
//! persisting a fresh one on first start. The key signs the DH parameters
//! of every fresh handshake (SHA-256 + PKCS#1 v1.5); clients verify against
//! the SubjectPublicKeyInfo DER carried in the hello.

use std::fs;
use std::io;
use std::path::Path;

use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::CryptoError;

pub const KEY_BITS: usize = 2048;

/// The server's long-lived signing key.
pub struct KeyStore {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl KeyStore {
    /// Load the key at `path`, or generate and persist a fresh one when the
    /// file does not exist. Any other failure is fatal.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let path = path.as_ref();
        let private = match fs::read_to_string(path) {
            Ok(pem) => RsaPrivateKey::from_pkcs8_pem(&pem)
                .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "generating new RSA-{} private key", KEY_BITS);
                let key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)?;
                persist(&key, path)?;
                key
            }
            Err(e) => return Err(CryptoError::Io(e)),
        };
        Self::from_private(private)
    }

    fn from_private(private: RsaPrivateKey) -> Result<Self, CryptoError> {
        let public_der = private
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?
            .into_vec();
        Ok(Self {
            private,
            public_der,
        })
    }

    /// SubjectPublicKeyInfo DER of the public half.
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Sign `data` with SHA-256 + RSA PKCS#1 v1.5.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let digest = Sha256::digest(data);
        Ok(self
            .private
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)?)
    }

    /// Verify a signature against an SPKI DER public key (client role and
    /// tests).
    pub fn verify(pub_der: &[u8], data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let public = RsaPublicKey::from_public_key_der(pub_der)
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        let digest = Sha256::digest(data);
        public
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            .map_err(|_| CryptoError::BadSignature)
    }
}

fn persist(key: &RsaPrivateKey, path: &Path) -> Result<(), CryptoError> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    fs::write(path, pem.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

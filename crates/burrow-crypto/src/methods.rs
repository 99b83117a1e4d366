//! Cipher-method registry.
//!
//! Maps wire method names to key/IV sizes and constructors for the
//! position-stateful byte-stream transforms installed on the pipe. Both
//! directions of a link must construct their pair from the same key and IV
//! at the same stream offset.

use aes::{Aes128, Aes192, Aes256};
use cipher::{BlockCipher, BlockEncryptMut, KeyInit, KeyIvInit, StreamCipher};
use rc4::Rc4;

use crate::error::CryptoError;

/// A position-stateful transform applied in place to a byte stream.
pub trait StreamTransform: Send {
    fn apply(&mut self, data: &mut [u8]);
}

/// Every RustCrypto stream cipher is usable as a transform.
impl<C: StreamCipher + Send> StreamTransform for C {
    #[inline]
    fn apply(&mut self, data: &mut [u8]) {
        self.apply_keystream(data);
    }
}

/// cfb-mode's buffered encryptor/decryptor expose their own `encrypt`/`decrypt`
/// methods rather than implementing `StreamCipher`. A local newtype is needed
/// to bridge them, since the blanket `StreamCipher` impl above would
/// otherwise conflict with a direct impl on the foreign type.
struct CfbEnc<C: BlockEncryptMut + BlockCipher>(cfb_mode::BufEncryptor<C>);
struct CfbDec<C: BlockEncryptMut + BlockCipher>(cfb_mode::BufDecryptor<C>);

impl<C: BlockEncryptMut + BlockCipher + Send> StreamTransform for CfbEnc<C> {
    #[inline]
    fn apply(&mut self, data: &mut [u8]) {
        self.0.encrypt(data);
    }
}

impl<C: BlockEncryptMut + BlockCipher + Send> StreamTransform for CfbDec<C> {
    #[inline]
    fn apply(&mut self, data: &mut [u8]) {
        self.0.decrypt(data);
    }
}

pub type BoxTransform = Box<dyn StreamTransform>;

/// Matched encrypt/decrypt transforms for one endpoint of a link.
pub struct CipherPair {
    pub encrypt: BoxTransform,
    pub decrypt: BoxTransform,
}

type Ctor = fn(&[u8], &[u8]) -> Result<CipherPair, CryptoError>;

/// One entry of the registry: `{ name, key_size, iv_size, constructor }`.
pub struct CipherMethod {
    pub name: &'static str,
    pub key_size: usize,
    pub iv_size: usize,
    ctor: Ctor,
}

macro_rules! cfb_pair {
    ($name:ident, $cipher:ty) => {
        fn $name(key: &[u8], iv: &[u8]) -> Result<CipherPair, CryptoError> {
            let enc = cfb_mode::BufEncryptor::<$cipher>::new_from_slices(key, iv)
                .map_err(|e| CryptoError::Cipher(e.to_string()))?;
            let dec = cfb_mode::BufDecryptor::<$cipher>::new_from_slices(key, iv)
                .map_err(|e| CryptoError::Cipher(e.to_string()))?;
            Ok(CipherPair {
                encrypt: Box::new(CfbEnc(enc)),
                decrypt: Box::new(CfbDec(dec)),
            })
        }
    };
}

cfb_pair!(aes_128_cfb_pair, Aes128);
cfb_pair!(aes_192_cfb_pair, Aes192);
cfb_pair!(aes_256_cfb_pair, Aes256);

fn rc4_pair(key: &[u8], _iv: &[u8]) -> Result<CipherPair, CryptoError> {
    let enc = Rc4::<cipher::consts::U16>::new_from_slice(key)
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;
    let dec = Rc4::<cipher::consts::U16>::new_from_slice(key)
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;
    Ok(CipherPair {
        encrypt: Box::new(enc),
        decrypt: Box::new(dec),
    })
}

static METHODS: &[CipherMethod] = &[
    CipherMethod {
        name: "aes-128-cfb",
        key_size: 16,
        iv_size: 16,
        ctor: aes_128_cfb_pair,
    },
    CipherMethod {
        name: "aes-192-cfb",
        key_size: 24,
        iv_size: 16,
        ctor: aes_192_cfb_pair,
    },
    CipherMethod {
        name: "aes-256-cfb",
        key_size: 32,
        iv_size: 16,
        ctor: aes_256_cfb_pair,
    },
    CipherMethod {
        name: "rc4",
        key_size: 16,
        iv_size: 0,
        ctor: rc4_pair,
    },
];

impl CipherMethod {
    /// Look up a method by its wire name.
    pub fn named(name: &str) -> Option<&'static CipherMethod> {
        METHODS.iter().find(|m| m.name == name)
    }

    /// All registered methods.
    pub fn all() -> &'static [CipherMethod] {
        METHODS
    }

    /// Construct an `(encryptor, decryptor)` pair from key material.
    pub fn build(&self, key: &[u8], iv: &[u8]) -> Result<CipherPair, CryptoError> {
        if key.len() != self.key_size || iv.len() != self.iv_size {
            return Err(CryptoError::Cipher(format!(
                "{}: want key {} iv {}, got key {} iv {}",
                self.name,
                self.key_size,
                self.iv_size,
                key.len(),
                iv.len()
            )));
        }
        (self.ctor)(key, iv)
    }
}

impl std::fmt::Debug for CipherMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherMethod")
            .field("name", &self.name)
            .field("key_size", &self.key_size)
            .field("iv_size", &self.iv_size)
            .finish()
    }
}

//! Diffie-Hellman cipher context.
//!
//! Each fresh handshake builds a [`CipherContext`] from the built-in group
//! bank, sends `(P, G, f)` signed by the server key, and derives the link
//! key and IV from the shared secret. The context outlives the handshake:
//! its derived key authenticates session-resume attempts.

use num_bigint::{BigUint, RandBigInt};
use once_cell::sync::Lazy;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::kdf::expand_key_iv;

/// Built-in bank of MODP groups (RFC 3526); the generator is 2 for every
/// entry. Index 5 is the 2048-bit group the handshake engine uses.
mod bank {
    use super::*;

    pub static MODP_1536: Lazy<BigUint> = Lazy::new(|| {
        prime_from_hex(
            "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
             29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
             EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
             E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
             EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
             C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
             83655D23DCA3AD961C62F356208552BB9ED529077096966D\
             670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF",
        )
    });

    pub static MODP_2048: Lazy<BigUint> = Lazy::new(|| {
        prime_from_hex(
            "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
             29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
             EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
             E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
             EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
             C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
             83655D23DCA3AD961C62F356208552BB9ED529077096966D\
             670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
             E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
             DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
             15728E5A8AACAA68FFFFFFFFFFFFFFFF",
        )
    });

    pub static MODP_3072: Lazy<BigUint> = Lazy::new(|| {
        prime_from_hex(
            "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
             29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
             EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
             E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
             EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
             C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
             83655D23DCA3AD961C62F356208552BB9ED529077096966D\
             670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
             E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
             DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
             15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64\
             ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7\
             ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B\
             F12FFA06D98A0864D87602733EC86A64521F2B18177B200C\
             BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31\
             43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
        )
    });

    fn prime_from_hex(hex_str: &str) -> BigUint {
        BigUint::from_bytes_be(&hex::decode(hex_str).expect("bank primes are valid hex"))
    }

    pub fn group(index: u8) -> Option<&'static BigUint> {
        match index {
            4 => Some(&MODP_1536),
            5 => Some(&MODP_2048),
            6 => Some(&MODP_3072),
            _ => None,
        }
    }
}

/// Generator shared by every bank entry.
pub const GENERATOR: u8 = 2;

/// Group index used for fresh handshakes.
pub const DEFAULT_GROUP: u8 = 5;

/// Per-handshake DH state, kept alive inside the session after login.
///
/// The private exponent is stored as big-endian bytes and scrubbed on drop;
/// the derived key and IV are scrubbed with it when the session is evicted.
pub struct CipherContext {
    prime: &'static BigUint,
    secret: Vec<u8>,
    public: BigUint,
    crypto_key: Vec<u8>,
    crypto_iv: Vec<u8>,
}

impl CipherContext {
    /// Build a context from the bank, generating a fresh key pair.
    pub fn new(group: u8) -> Result<Self, CryptoError> {
        let prime = bank::group(group).ok_or(CryptoError::UnknownGroup(group))?;
        Ok(Self::with_prime(prime))
    }

    fn with_prime(prime: &'static BigUint) -> Self {
        let mut rng = rand::thread_rng();
        // Uniform secret in [2, P-2]
        let upper = prime - 1u32;
        let secret = rng.gen_biguint_range(&BigUint::from(2u32), &upper);
        let public = BigUint::from(GENERATOR).modpow(&secret, prime);
        Self {
            prime,
            secret: secret.to_bytes_be(),
            public,
            crypto_key: Vec::new(),
            crypto_iv: Vec::new(),
        }
    }

    /// Client role: adopt the prime announced in a server hello. The prime
    /// must match a bank entry, which pins it to a vetted group.
    pub fn from_prime_bytes(prime: &[u8]) -> Result<Self, CryptoError> {
        let candidate = BigUint::from_bytes_be(prime);
        for index in [4u8, 5, 6] {
            let known = bank::group(index).expect("bank indices are fixed");
            if *known == candidate {
                return Ok(Self::with_prime(known));
            }
        }
        Err(CryptoError::PublicOutOfRange)
    }

    /// Big-endian bytes of P.
    pub fn prime_bytes(&self) -> Vec<u8> {
        self.prime.to_bytes_be()
    }

    /// Big-endian bytes of the local public value.
    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.to_bytes_be()
    }

    /// Validate the peer public value, compute the shared secret, and
    /// derive `(crypto_key, crypto_iv)` of the requested sizes.
    pub fn derive_keys(
        &mut self,
        peer_public: &[u8],
        key_size: usize,
        iv_size: usize,
    ) -> Result<(), CryptoError> {
        let peer = BigUint::from_bytes_be(peer_public);
        let upper = self.prime - 1u32;
        if peer <= BigUint::from(1u32) || peer >= upper {
            return Err(CryptoError::PublicOutOfRange);
        }
        let secret = BigUint::from_bytes_be(&self.secret);
        let shared = peer.modpow(&secret, self.prime);
        let mut shared_bytes = shared.to_bytes_be();
        let (key, iv) = expand_key_iv(&shared_bytes, key_size, iv_size);
        shared_bytes.zeroize();
        self.crypto_key = key;
        self.crypto_iv = iv;
        Ok(())
    }

    /// Derived link key; empty before [`derive_keys`](Self::derive_keys).
    pub fn crypto_key(&self) -> &[u8] {
        &self.crypto_key
    }

    /// Derived link IV; empty before [`derive_keys`](Self::derive_keys).
    pub fn crypto_iv(&self) -> &[u8] {
        &self.crypto_iv
    }
}

impl Drop for CipherContext {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.crypto_key.zeroize();
        self.crypto_iv.zeroize();
    }
}

impl std::fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherContext")
            .field("prime_bits", &self.prime.bits())
            .finish_non_exhaustive()
    }
}

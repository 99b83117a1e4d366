//! Deterministic key material expansion and the resume MAC.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Expand a secret into `(key, iv)` of the requested sizes.
///
/// The digest chain starts at `SHA256(secret)` and re-hashes the previous
/// block until enough bytes exist; key and IV are consecutive slices of the
/// chain. Deterministic: both endpoints derive identical material from the
/// same secret.
pub fn expand_key_iv(secret: &[u8], key_size: usize, iv_size: usize) -> (Vec<u8>, Vec<u8>) {
    let mut out = Vec::with_capacity(key_size + iv_size + 32);
    let mut block = Sha256::digest(secret);
    out.extend_from_slice(&block);
    while out.len() < key_size + iv_size {
        block = Sha256::digest(block);
        out.extend_from_slice(&block);
    }
    let key = out[..key_size].to_vec();
    let iv = out[key_size..key_size + iv_size].to_vec();
    (key, iv)
}

/// HMAC-SHA256 over `data`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Constant-time verification of an HMAC-SHA256 tag.
pub fn hmac_verify(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}

//! Opaque bearer tokens for login sessions.

use crate::crypto::hashing::sha256;
use rand::RngCore;

/// Returns `(token, sha256(token))`; only the digest is ever stored.
pub fn new_session_token() -> (String, [u8; 32]) {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let token = hex::encode(raw);
    let digest = token_digest(&token);
    (token, digest)
}

pub fn token_digest(token: &str) -> [u8; 32] {
    sha256(token.as_bytes())
}

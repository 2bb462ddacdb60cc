//! Sealing of biometric templates at rest.
//!
//! Layout: `salt (16) || nonce (12) || AES-256-GCM ciphertext+tag`. The key is
//! derived per template from the service secret and the random salt with Argon2.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use rand::RngCore;
use thiserror::Error;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SealError {
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error("sealed template is truncated")]
    Truncated,
    #[error("sealed template could not be opened (wrong secret or corrupted data)")]
    Open,
    #[error("encryption failed")]
    Encrypt,
}

#[derive(Clone)]
pub struct TemplateSealer {
    secret: Vec<u8>,
}

impl TemplateSealer {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn cipher(&self, salt: &[u8]) -> Result<Aes256Gcm, SealError> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(&self.secret, salt, &mut key)
            .map_err(|e| SealError::Kdf(e.to_string()))?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher(&salt)?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SealError::Encrypt)?;

        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
        if sealed.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(SealError::Truncated);
        }
        let (salt, rest) = sealed.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        self.cipher(salt)?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SealError::Open)
    }
}

impl std::fmt::Debug for TemplateSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TemplateSealer([REDACTED])")
    }
}

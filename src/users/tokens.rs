//! Activation tokens.

use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::http::response::FieldErrors;

/// Length of an encoded token (16 random bytes, base64 without padding).
pub const TOKEN_PLAINTEXT_LEN: usize = 22;

/// What a token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Activation,
}

/// A freshly issued token. `plaintext` is never stored.
#[derive(Debug, Clone)]
pub struct Token {
    pub plaintext: String,
    pub hash: [u8; 32],
    pub user_id: i64,
    pub expiry: Instant,
    pub scope: Scope,
}

impl Token {
    pub fn generate(user_id: i64, ttl: Duration, scope: Scope) -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let plaintext = URL_SAFE_NO_PAD.encode(bytes);

        Self {
            hash: hash_plaintext(&plaintext),
            plaintext,
            user_id,
            expiry: Instant::now() + ttl,
            scope,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expiry
    }
}

pub fn hash_plaintext(plaintext: &str) -> [u8; 32] {
    Sha256::digest(plaintext.as_bytes()).into()
}

/// Check the shape of a token supplied by a client.
pub fn validate_plaintext(plaintext: &str) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    if plaintext.is_empty() {
        errors.insert("token", "must be provided");
    } else if plaintext.len() != TOKEN_PLAINTEXT_LEN {
        errors.insert("token", "must be 22 bytes long");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

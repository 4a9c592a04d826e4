//! Password hashing.
//!
//! bcrypt is CPU-bound, so hashing runs on the blocking pool and never on a
//! runtime worker.

use crate::http::response::FieldErrors;

pub const MIN_PASSWORD_BYTES: usize = 8;
/// bcrypt ignores input past this length.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("failed to hash password: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("password hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Check a plaintext password supplied by a client.
pub fn validate_plaintext(plaintext: &str, errors: &mut FieldErrors) {
    if plaintext.is_empty() {
        errors.insert("password", "must be provided");
    } else if plaintext.len() < MIN_PASSWORD_BYTES {
        errors.insert("password", "must be at least 8 bytes long");
    } else if plaintext.len() > MAX_PASSWORD_BYTES {
        errors.insert("password", "must not be more than 72 bytes long");
    }
}

/// Hash `plaintext` with the given bcrypt work factor.
pub async fn hash(plaintext: String, cost: u32) -> Result<String, PasswordError> {
    let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, cost)).await??;
    Ok(hashed)
}

/// Compare `plaintext` against a stored hash.
pub async fn matches(plaintext: String, hash: String) -> Result<bool, PasswordError> {
    let ok = tokio::task::spawn_blocking(move || bcrypt::verify(plaintext, &hash)).await??;
    Ok(ok)
}

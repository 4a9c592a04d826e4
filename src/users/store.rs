//! In-memory user registry.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::http::response::FieldErrors;
use crate::users::password;
use crate::users::tokens::{hash_plaintext, Scope, Token};

const MAX_NAME_BYTES: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub activated: bool,
    #[serde(skip)]
    pub password_hash: String,
    pub version: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("a user with this email address already exists")]
    DuplicateEmail,

    #[error("record not found")]
    RecordNotFound,

    #[error("edit conflict")]
    EditConflict,

    #[error("invalid user")]
    Invalid(FieldErrors),
}

/// Users, their email index and outstanding tokens.
#[derive(Debug)]
pub struct UserStore {
    users: DashMap<i64, User>,
    emails: DashMap<String, i64>,
    tokens: DashMap<[u8; 32], Token>,
    next_id: AtomicI64,
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            tokens: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Validate and insert a new, not yet activated user.
    ///
    /// `password_hash` must already be hashed; see [`password::hash`].
    pub fn insert(
        &self,
        name: &str,
        email: &str,
        password_hash: String,
    ) -> Result<User, UserError> {
        let mut errors = FieldErrors::new();
        validate_user(name, email, &mut errors);
        if !errors.is_empty() {
            return Err(UserError::Invalid(errors));
        }

        // The email entry lock makes the uniqueness check and insert atomic.
        match self.emails.entry(email.to_lowercase()) {
            Entry::Occupied(_) => Err(UserError::DuplicateEmail),
            Entry::Vacant(slot) => {
                let user = User {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    name: name.to_string(),
                    email: email.to_string(),
                    activated: false,
                    password_hash,
                    version: 1,
                };
                self.users.insert(user.id, user.clone());
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    pub fn get(&self, id: i64) -> Option<User> {
        self.users.get(&id).map(|user| user.value().clone())
    }

    /// Issue and remember a token for `user_id`.
    pub fn issue_token(&self, user_id: i64, ttl: Duration, scope: Scope) -> Token {
        let token = Token::generate(user_id, ttl, scope);
        self.tokens.insert(token.hash, token.clone());
        token
    }

    /// Remove a valid token and return the user it belongs to.
    ///
    /// Only one caller can consume a given token.
    pub fn consume_token(&self, scope: Scope, plaintext: &str) -> Result<User, UserError> {
        let now = Instant::now();
        let (_, token) = self
            .tokens
            .remove_if(&hash_plaintext(plaintext), |_, token| {
                token.scope == scope && !token.is_expired_at(now)
            })
            .ok_or(UserError::RecordNotFound)?;
        self.get(token.user_id).ok_or(UserError::RecordNotFound)
    }

    /// Mark a user activated, bumping its version.
    ///
    /// Fails with [`UserError::EditConflict`] if the record changed since
    /// `expected_version` was read.
    pub fn activate(&self, id: i64, expected_version: u32) -> Result<User, UserError> {
        let mut user = self.users.get_mut(&id).ok_or(UserError::RecordNotFound)?;
        if user.version != expected_version {
            return Err(UserError::EditConflict);
        }
        user.activated = true;
        user.version += 1;
        Ok(user.value().clone())
    }

    /// Drop every token of `scope` held by `user_id`.
    pub fn delete_tokens_for_user(&self, user_id: i64, scope: Scope) {
        self.tokens
            .retain(|_, token| !(token.user_id == user_id && token.scope == scope));
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a registration request, collecting a message per bad field.
pub fn validate_registration(name: &str, email: &str, plaintext: &str) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    validate_user(name, email, &mut errors);
    password::validate_plaintext(plaintext, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_user(name: &str, email: &str, errors: &mut FieldErrors) {
    if name.trim().is_empty() {
        errors.insert("name", "must be provided");
    } else if name.len() > MAX_NAME_BYTES {
        errors.insert("name", "must not be more than 500 bytes long");
    }

    if email.trim().is_empty() {
        errors.insert("email", "must be provided");
    } else if !email.contains('@') {
        errors.insert("email", "must be a valid email address");
    }
}

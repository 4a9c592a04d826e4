//! User accounts and activation.
//!
//! # Data Flow
//! ```text
//! POST /v1/users
//!     → store.rs (validate name, email, password)
//!     → password.rs (bcrypt hash on the blocking pool)
//!     → store.rs (insert inactive user)
//!     → tokens.rs (issue single-use activation token)
//!     → mailer.rs (welcome message, sent from a background task)
//!
//! PUT /v1/users/activated
//!     → tokens.rs (validate plaintext)
//!     → store.rs (consume token, mark user activated if unchanged)
//! ```
//!
//! # Design Decisions
//! - Accounts live in memory; persistence is outside this crate
//! - Only token hashes are stored; the plaintext exists in the welcome message
//! - Only password hashes are stored and they are never serialized

pub mod mailer;
pub mod password;
pub mod store;
pub mod tokens;

pub use mailer::{LogMailer, MailError, Mailer, WelcomeMessage};
pub use password::PasswordError;
pub use store::{validate_registration, User, UserError, UserStore};
pub use tokens::{Scope, Token};

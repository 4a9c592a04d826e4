//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → cli.rs (command-line flags override file values)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is resolved once at startup and never mutated afterwards
//! - All fields have defaults to allow running with no config file at all
//! - Validation separates syntactic (serde) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;

pub use cli::Cli;
pub use loader::{load_config, ConfigError};
pub use schema::{
    AppConfig, LifecycleConfig, LimiterConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    PasswordConfig, TokenConfig,
};

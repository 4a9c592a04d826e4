//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (derive client identity, check per-IP token bucket)
//!     → Pass to handlers
//! ```
//!
//! # Design Decisions
//! - Identity failures are server errors (500), never throttle decisions
//! - Throttle state is bounded by a periodic sweep of idle clients

pub mod rate_limit;

pub use rate_limit::{client_identity, ClientThrottle, IdentityError, ThrottleSettings};

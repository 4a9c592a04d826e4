//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → transport.rs (axum serve loop, peer address attached)
//!     → server.rs (request ID, tracing, timeout, panic recovery)
//!     → security::rate_limit (per-client admission)
//!     → handlers.rs (healthcheck, users)
//!     → response.rs (JSON error envelope)
//!     → Send to client
//! ```

pub mod handlers;
pub mod response;
pub mod server;
pub mod transport;

pub use response::ApiError;
pub use server::{AppState, HttpServer};
pub use transport::AxumTransport;

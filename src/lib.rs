//! Greenlight API service library

// Core subsystems
pub mod config;
pub mod http;
pub mod users;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::{Shutdown, TaskRunner};
pub use security::ClientThrottle;

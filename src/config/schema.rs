//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the API server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, environment, request timeout).
    pub listener: ListenerConfig,

    /// Per-client rate limiting.
    pub limiter: LimiterConfig,

    /// Graceful shutdown bounds.
    pub lifecycle: LifecycleConfig,

    /// Activation token settings.
    pub tokens: TokenConfig,

    /// Password hashing.
    pub passwords: PasswordConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:4000").
    pub bind_address: String,

    /// Deployment environment reported by the healthcheck.
    pub environment: String,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4000".to_string(),
            environment: "development".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Tokens added to each client's bucket per second.
    pub requests_per_second: f64,

    /// Bucket capacity (maximum burst).
    pub burst: u32,

    /// How often idle clients are swept from the registry, in seconds.
    pub sweep_interval_secs: u64,
}

impl LimiterConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 2.0,
            burst: 4,
            sweep_interval_secs: 60,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Time allowed for in-flight requests to finish once shutdown starts.
    pub shutdown_timeout_secs: u64,

    /// Upper bound on waiting for background tasks. Unset waits forever.
    pub task_drain_timeout_secs: Option<u64>,
}

impl LifecycleConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn task_drain_timeout(&self) -> Option<Duration> {
        self.task_drain_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 5,
            task_drain_timeout_secs: None,
        }
    }
}

/// Activation token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Lifetime of an activation token in seconds.
    pub activation_ttl_secs: u64,
}

impl TokenConfig {
    pub fn activation_ttl(&self) -> Duration {
        Duration::from_secs(self.activation_ttl_secs)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            activation_ttl_secs: 3 * 24 * 60 * 60, // 3 days
        }
    }
}

/// Password hashing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// bcrypt work factor (4..=31).
    pub cost: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self { cost: 12 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable output for local development.
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

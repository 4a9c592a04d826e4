//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates > 0, timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::AppConfig;

/// Longest accepted sweep interval (one day).
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// bcrypt work factor bounds.
pub const PASSWORD_COST_RANGE: std::ops::RangeInclusive<u32> = 4..=31;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a valid socket address")]
    InvalidBindAddress(String),

    #[error("limiter.requests_per_second must be positive, got {0}")]
    NonPositiveRate(f64),

    #[error("limiter.burst must be at least 1")]
    ZeroBurst,

    #[error("limiter.sweep_interval_secs must be greater than zero")]
    ZeroSweepInterval,

    #[error("limiter.sweep_interval_secs must be at most {MAX_SWEEP_INTERVAL_SECS}, got {0}")]
    SweepIntervalTooLarge(u64),

    #[error("lifecycle.shutdown_timeout_secs must be greater than zero")]
    ZeroShutdownTimeout,

    #[error("tokens.activation_ttl_secs must be greater than zero")]
    ZeroTokenTtl,

    #[error("passwords.cost must be between 4 and 31, got {0}")]
    InvalidPasswordCost(u32),

    #[error("observability.metrics_address '{0}' is not a valid socket address")]
    InvalidMetricsAddress(String),
}

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let rps = config.limiter.requests_per_second;
    if rps.is_nan() || rps <= 0.0 {
        errors.push(ValidationError::NonPositiveRate(rps));
    }
    if config.limiter.burst == 0 {
        errors.push(ValidationError::ZeroBurst);
    }
    if config.limiter.sweep_interval_secs == 0 {
        errors.push(ValidationError::ZeroSweepInterval);
    } else if config.limiter.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS {
        errors.push(ValidationError::SweepIntervalTooLarge(
            config.limiter.sweep_interval_secs,
        ));
    }

    if config.lifecycle.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::ZeroShutdownTimeout);
    }
    if config.tokens.activation_ttl_secs == 0 {
        errors.push(ValidationError::ZeroTokenTtl);
    }
    if !PASSWORD_COST_RANGE.contains(&config.passwords.cost) {
        errors.push(ValidationError::InvalidPasswordCost(config.passwords.cost));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

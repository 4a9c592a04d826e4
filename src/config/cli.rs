//! Command-line flags.
//!
//! Flags mirror the most commonly tuned settings so the server can run
//! without a config file. When both are given, flags win.

use std::path::PathBuf;

use clap::Parser;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::AppConfig;
use crate::config::validation::validate_config;

#[derive(Debug, Parser)]
#[command(name = "greenlight")]
#[command(about = "JSON API server with per-client throttling and graceful shutdown", long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on (keeps the configured host).
    #[arg(long)]
    pub port: Option<u16>,

    /// Environment (development|staging|production).
    #[arg(long = "env")]
    pub environment: Option<String>,

    /// Rate limiter maximum requests per second.
    #[arg(long)]
    pub limiter_rps: Option<f64>,

    /// Rate limiter maximum burst.
    #[arg(long)]
    pub limiter_burst: Option<u32>,

    /// Enable rate limiter.
    #[arg(long)]
    pub limiter_enabled: Option<bool>,
}

impl Cli {
    /// Resolve the final configuration: file (or defaults), then flags, then validation.
    pub fn into_config(self) -> Result<AppConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => AppConfig::default(),
        };
        self.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            let host = config
                .listener
                .bind_address
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            config.listener.bind_address = format!("{host}:{port}");
        }
        if let Some(env) = &self.environment {
            config.listener.environment = env.clone();
        }
        if let Some(rps) = self.limiter_rps {
            config.limiter.requests_per_second = rps;
        }
        if let Some(burst) = self.limiter_burst {
            config.limiter.burst = burst;
        }
        if let Some(enabled) = self.limiter_enabled {
            config.limiter.enabled = enabled;
        }
    }
}

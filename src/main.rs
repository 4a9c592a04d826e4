//! Greenlight API service
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ transport ──▶ request id / trace / timeout / catch-panic
//!                                        │
//!                                        ▼
//!                                  client throttle ──(429)──▶ Client
//!                                        │
//!                                        ▼
//!                                    handlers ──▶ task runner (welcome mail)
//!
//!     SIGINT / SIGTERM ──▶ shutdown coordinator
//!                            1. stop accepting, finish in-flight requests
//!                            2. drain background tasks
//!                            3. report outcome, exit
//! ```

use clap::Parser;

use greenlight::config::Cli;
use greenlight::http::{transport, HttpServer};
use greenlight::lifecycle::{signals, Shutdown};
use greenlight::observability::{logging, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "greenlight starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        environment = %config.listener.environment,
        limiter_enabled = config.limiter.enabled,
        limiter_rps = config.limiter.requests_per_second,
        limiter_burst = config.limiter.burst,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // Validation already checked the address parses.
        let addr: std::net::SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let listener = transport::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    signals::install(shutdown.clone())?;

    let server = HttpServer::new(config);
    if let Err(e) = server.run(listener, shutdown).await {
        tracing::error!(error = %e, "Shutdown failed");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

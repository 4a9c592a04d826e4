//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT)
//! - Translate the first signal into a [`Shutdown`] trigger
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Signals are just one producer of the shutdown trigger; nothing else
//!   in the lifecycle knows where the trigger came from

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::{Shutdown, ShutdownReason};

/// Register signal handlers and spawn the task that waits on them.
///
/// Registration happens before this returns, so a failure to install a
/// handler is reported to the caller instead of being lost in a task.
pub fn install(shutdown: Shutdown) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        Ok(tokio::spawn(async move {
            let reason = tokio::select! {
                _ = sigint.recv() => ShutdownReason::Interrupt,
                _ = sigterm.recv() => ShutdownReason::Terminate,
            };
            tracing::debug!(signal = %reason, "Signal received");
            shutdown.trigger(reason);
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    shutdown.trigger(ShutdownReason::Interrupt);
                }
                Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
            }
        }))
    }
}

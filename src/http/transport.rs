//! Axum-backed [`Transport`].
//!
//! # Responsibilities
//! - Bind the TCP listener
//! - Serve the router with peer addresses attached to every request
//! - Stop accepting on request and wait, bounded, for in-flight requests

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};

use crate::config::ListenerConfig;
use crate::lifecycle::{Transport, TransportError};

/// Bind to the configured address.
pub async fn bind(config: &ListenerConfig) -> Result<TcpListener, TransportError> {
    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        TransportError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })?;

    let listener = TcpListener::bind(addr).await.map_err(TransportError::Bind)?;
    let local_addr = listener.local_addr().map_err(TransportError::Bind)?;

    tracing::info!(address = %local_addr, "Listener bound");
    Ok(listener)
}

/// A bound listener plus the router it will serve.
pub struct AxumTransport {
    parts: Mutex<Option<(TcpListener, Router)>>,
    /// Set once shutdown starts; axum stops accepting when it flips.
    stopping: watch::Sender<bool>,
    /// Set once the serve loop has returned.
    closed: watch::Sender<bool>,
    /// Tells the serve loop to stop waiting for stuck connections.
    abandon: Notify,
}

impl AxumTransport {
    pub fn new(listener: TcpListener, router: Router) -> Self {
        Self {
            parts: Mutex::new(Some((listener, router))),
            stopping: watch::channel(false).0,
            closed: watch::channel(false).0,
            abandon: Notify::new(),
        }
    }
}

impl Transport for AxumTransport {
    async fn serve(&self) -> Result<(), TransportError> {
        let parts = self
            .parts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let (listener, router) = parts.ok_or(TransportError::AlreadyServing)?;

        let mut stopping = self.stopping.subscribe();
        let server = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = stopping.wait_for(|stopping| *stopping).await;
        });

        let result = tokio::select! {
            result = server.into_future() => result.map_err(TransportError::Serve),
            () = self.abandon.notified() => {
                tracing::warn!("Abandoning connections still in flight");
                Ok(())
            }
        };

        self.closed.send_replace(true);
        result
    }

    async fn shutdown(&self, timeout: Duration) -> Result<(), TransportError> {
        self.stopping.send_replace(true);

        let never_served = self
            .parts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if never_served {
            return Ok(());
        }

        let mut closed = self.closed.subscribe();
        let waited = tokio::time::timeout(timeout, closed.wait_for(|closed| *closed))
            .await
            .map(|_| ());
        match waited {
            Ok(()) => Ok(()),
            Err(_) => {
                self.abandon.notify_one();
                Err(TransportError::ShutdownTimeout(timeout))
            }
        }
    }
}

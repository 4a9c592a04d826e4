//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use greenlight::config::AppConfig;
use greenlight::http::HttpServer;
use greenlight::lifecycle::{LifecycleError, Shutdown, ShutdownReason};
use greenlight::users::{MailError, Mailer, WelcomeMessage};

/// A server running on an ephemeral port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), LifecycleError>>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to finish.
    pub async fn stop(self) -> Result<(), LifecycleError> {
        self.shutdown.trigger(ShutdownReason::Requested);
        self.handle.await.expect("server task panicked")
    }
}

/// Defaults suitable for tests: loopback, a generous limiter, cheap hashing.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.listener.environment = "testing".into();
    config.limiter.requests_per_second = 100.0;
    config.limiter.burst = 100;
    config.passwords.cost = 4;
    config
}

pub async fn spawn_app(config: AppConfig) -> TestApp {
    spawn_app_with_mailer(config, Arc::new(RecordingMailer::default())).await
}

pub async fn spawn_app_with_mailer(config: AppConfig, mailer: Arc<dyn Mailer>) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::with_mailer(config, mailer);
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();

    TestApp {
        addr,
        shutdown,
        handle,
        client,
    }
}

/// Mailer that keeps every delivered message, optionally after a delay.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    pub delivered: Arc<Mutex<Vec<WelcomeMessage>>>,
    pub delay: Duration,
    pub fail: bool,
}

impl RecordingMailer {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<WelcomeMessage> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Mailer for RecordingMailer {
    fn send_welcome(&self, message: WelcomeMessage) -> BoxFuture<'static, Result<(), MailError>> {
        let delivered = Arc::clone(&self.delivered);
        let delay = self.delay;
        let fail = self.fail;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if fail {
                return Err(MailError {
                    recipient: message.recipient,
                    reason: "smtp unavailable".into(),
                });
            }
            delivered.lock().unwrap().push(message);
            Ok(())
        })
    }
}

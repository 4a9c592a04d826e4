//! Per-client rate limiting middleware.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::LimiterConfig;
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::lifecycle::ShutdownListener;
use crate::observability::metrics;

/// Idle clients are evicted after this many sweep intervals.
const EVICTION_INTERVALS: u32 = 3;

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        if now > self.last_update {
            self.last_update = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct ClientEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Limiter settings, fixed for the lifetime of a [`ClientThrottle`].
#[derive(Debug, Clone)]
pub struct ThrottleSettings {
    pub enabled: bool,
    pub requests_per_second: f64,
    pub burst: u32,
    pub sweep_interval: Duration,
}

impl From<&LimiterConfig> for ThrottleSettings {
    fn from(config: &LimiterConfig) -> Self {
        Self {
            enabled: config.enabled,
            requests_per_second: config.requests_per_second,
            burst: config.burst,
            sweep_interval: config.sweep_interval(),
        }
    }
}

/// Token-bucket state for every client seen recently.
///
/// One mutex guards the whole registry. It is held for the lookup and the
/// token decision only, neither of which can block.
#[derive(Debug)]
pub struct ClientThrottle {
    clients: Mutex<HashMap<String, ClientEntry>>,
    settings: ThrottleSettings,
}

impl ClientThrottle {
    pub fn new(settings: ThrottleSettings) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::new(config.into())
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Entries idle for longer than this are removed by the sweep.
    pub fn eviction_window(&self) -> Duration {
        self.settings.sweep_interval.saturating_mul(EVICTION_INTERVALS)
    }

    /// Decide whether `client_id` may make a request now.
    pub fn admit(&self, client_id: &str) -> bool {
        self.admit_at(client_id, Instant::now())
    }

    /// Same as [`admit`](Self::admit) with an explicit clock reading.
    pub fn admit_at(&self, client_id: &str, now: Instant) -> bool {
        if !self.settings.enabled {
            return true;
        }

        let capacity = f64::from(self.settings.burst);
        let mut clients = self.lock();
        let entry = clients
            .entry(client_id.to_owned())
            .or_insert_with(|| ClientEntry {
                bucket: TokenBucket::new(capacity, now),
                last_seen: now,
            });
        entry.last_seen = now;
        entry
            .bucket
            .try_acquire(capacity, self.settings.requests_per_second, now)
    }

    /// Remove every client not seen within the eviction window.
    ///
    /// Returns how many entries were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let window = self.eviction_window();
        let mut clients = self.lock();
        let before = clients.len();
        clients.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= window);
        let evicted = before - clients.len();
        metrics::record_tracked_clients(clients.len());
        evicted
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    /// Sweep on a fixed interval until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: ShutdownListener) {
        let period = self.settings.sweep_interval;
        let Some(first_tick) = tokio::time::Instant::now().checked_add(period) else {
            tracing::warn!(
                interval_secs = period.as_secs(),
                "Sweep interval out of range, client sweeper disabled"
            );
            return;
        };
        let mut ticker = tokio::time::interval_at(first_tick, period);

        tracing::info!(
            interval_secs = period.as_secs(),
            window_secs = self.eviction_window().as_secs(),
            "Client sweeper starting"
        );

        loop {
            tokio::select! {
                now = ticker.tick() => {
                    let evicted = self.sweep_at(now.into_std());
                    if evicted > 0 {
                        tracing::debug!(evicted, "Evicted idle clients");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Client sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientEntry>> {
        // Entries stay consistent even if a holder panicked; keep serving.
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The transport did not tell us who is calling.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("remote address is unavailable for this request")]
    MissingRemoteAddr,
}

/// Key a request by the IP of its peer.
pub fn client_identity<B>(request: &Request<B>) -> Result<String, IdentityError> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .ok_or(IdentityError::MissingRemoteAddr)
}

/// Middleware function for per-client rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.throttle.is_enabled() {
        return next.run(request).await;
    }

    let client = match client_identity(&request) {
        Ok(client) => client,
        Err(e) => return ApiError::internal(e).into_response(),
    };

    if state.throttle.admit(&client) {
        next.run(request).await
    } else {
        tracing::warn!(client = %client, "Rate limit exceeded");
        metrics::record_throttled();
        ApiError::RateLimitExceeded.into_response()
    }
}

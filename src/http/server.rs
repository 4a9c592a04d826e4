//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, panic recovery, throttling)
//! - Own the shared state handed to handlers
//! - Start the client sweeper and hand the listener to the shutdown coordinator

use std::sync::Arc;
use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    middleware,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::http::handlers;
use crate::http::response::panic_response;
use crate::http::transport::AxumTransport;
use crate::lifecycle::{LifecycleError, Shutdown, ShutdownCoordinator, TaskRunner};
use crate::security::rate_limit::{rate_limit_middleware, ClientThrottle};
use crate::users::{LogMailer, Mailer, UserStore};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub throttle: Arc<ClientThrottle>,
    pub tasks: TaskRunner,
    pub users: Arc<UserStore>,
    pub mailer: Arc<dyn Mailer>,
}

/// HTTP server for the API.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self::with_mailer(config, Arc::new(LogMailer))
    }

    /// Create a server that delivers notifications through `mailer`.
    pub fn with_mailer(config: AppConfig, mailer: Arc<dyn Mailer>) -> Self {
        let state = AppState {
            throttle: Arc::new(ClientThrottle::from_config(&config.limiter)),
            config: Arc::new(config),
            tasks: TaskRunner::new(),
            users: Arc::new(UserStore::new()),
            mailer,
        };

        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Self::with_middleware(Self::routes(), state)
    }

    fn routes() -> Router<AppState> {
        Router::new()
            .route("/v1/healthcheck", get(handlers::healthcheck))
            .route("/v1/users", post(handlers::register_user))
            .route("/v1/users/activated", put(handlers::activate_user))
    }

    /// Wrap `routes` in the fallbacks, throttle and the outer service stack.
    fn with_middleware(routes: Router<AppState>, state: AppState) -> Router {
        let request_timeout = Duration::from_secs(state.config.listener.request_timeout_secs);

        routes
            .fallback(handlers::not_found)
            .method_not_allowed_fallback(handlers::method_not_allowed)
            .layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit_middleware,
            ))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(HandleErrorLayer::new(handlers::middleware_error))
                    .timeout(request_timeout)
                    .layer(CatchPanicLayer::custom(panic_response)),
            )
    }

    /// Handle used by request handlers to submit background work.
    pub fn tasks(&self) -> TaskRunner {
        self.state.tasks.clone()
    }

    pub fn throttle(&self) -> Arc<ClientThrottle> {
        Arc::clone(&self.state.throttle)
    }

    pub fn users(&self) -> Arc<UserStore> {
        Arc::clone(&self.state.users)
    }

    /// Serve on `listener` until `shutdown` fires and everything has drained.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), LifecycleError> {
        let config = Arc::clone(&self.state.config);

        if self.state.throttle.is_enabled() {
            tokio::spawn(self.throttle().run_sweeper(shutdown.subscribe()));
        }

        tracing::info!(
            env = %config.listener.environment,
            limiter_enabled = config.limiter.enabled,
            "HTTP server starting"
        );

        let transport = AxumTransport::new(listener, self.router);
        ShutdownCoordinator::new(transport, self.state.tasks, shutdown)
            .with_shutdown_timeout(config.lifecycle.shutdown_timeout())
            .with_drain_timeout(config.lifecycle.task_drain_timeout())
            .run()
            .await
    }
}

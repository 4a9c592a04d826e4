//! Graceful shutdown orchestration.
//!
//! # State Transitions
//! ```text
//! Running → Draining: shutdown trigger observed
//!     stop the listener (bounded by shutdown_timeout)
//!     then drain background tasks (optionally bounded)
//! Draining → Stopped: outcome handed to the serving path
//! Running → Failed: serve loop returned an error
//! ```
//!
//! # Design Decisions
//! - Listener stop must fully resolve before task drain starts, so no
//!   in-flight request can submit work after the drain has begun
//! - The final outcome travels over a oneshot; the serving path does not
//!   report "stopped" until it has received it
//! - A listener timeout does not skip the task drain; it only becomes the
//!   reported error

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};

use crate::lifecycle::shutdown::{Shutdown, ShutdownListener, ShutdownReason};
use crate::lifecycle::tasks::{TaskError, TaskRunner};

/// Default bound on waiting for in-flight requests.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors reported by an HTTP transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("listener failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("in-flight requests did not finish within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("transport is already serving")]
    AlreadyServing,
}

/// The listener side of the server, as seen by the coordinator.
pub trait Transport: Send + Sync + 'static {
    /// Accept and serve connections until stopped.
    ///
    /// Returns `Ok(())` once the transport has been closed through
    /// [`shutdown`](Transport::shutdown); any error is fatal.
    fn serve(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Stop accepting and wait up to `timeout` for in-flight requests.
    fn shutdown(&self, timeout: Duration)
        -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Final error of a server run.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Drain(#[from] TaskError),

    #[error("shutdown path ended without reporting an outcome")]
    OutcomeLost,
}

/// Where the server is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Stopped,
    Failed,
}

/// Drives a [`Transport`] and a [`TaskRunner`] from start to exit.
pub struct ShutdownCoordinator<T> {
    transport: Arc<T>,
    tasks: TaskRunner,
    shutdown: Shutdown,
    shutdown_timeout: Duration,
    drain_timeout: Option<Duration>,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl<T: Transport> ShutdownCoordinator<T> {
    pub fn new(transport: T, tasks: TaskRunner, shutdown: Shutdown) -> Self {
        let (state, _) = watch::channel(LifecycleState::Running);
        Self {
            transport: Arc::new(transport),
            tasks,
            shutdown,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            drain_timeout: None,
            state: Arc::new(state),
        }
    }

    /// Bound on waiting for in-flight requests.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bound on waiting for background tasks. `None` waits forever.
    pub fn with_drain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Serve until shutdown completes.
    ///
    /// `Ok(())` means a clean exit; any error should end the process with a
    /// non-zero status.
    pub async fn run(self) -> Result<(), LifecycleError> {
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let drain_path = tokio::spawn(drain_on_trigger(
            Arc::clone(&self.transport),
            self.tasks.clone(),
            self.shutdown.subscribe(),
            self.shutdown_timeout,
            self.drain_timeout,
            Arc::clone(&self.state),
            outcome_tx,
        ));

        tracing::info!("Starting server");

        if let Err(e) = self.transport.serve().await {
            self.state.send_replace(LifecycleState::Failed);
            drain_path.abort();
            tracing::error!(error = %e, "Server failed");
            return Err(e.into());
        }

        // The transport may close without anyone asking (e.g. its own
        // shutdown was called directly). Make sure the drain path runs.
        if self.shutdown.trigger(ShutdownReason::Requested) {
            tracing::warn!("Transport closed before shutdown was triggered");
        }

        let outcome = outcome_rx.await.unwrap_or(Err(LifecycleError::OutcomeLost));
        self.state.send_replace(LifecycleState::Stopped);

        match &outcome {
            Ok(()) => tracing::info!("Stopped server"),
            Err(e) => tracing::error!(error = %e, "Server stopped with error"),
        }
        outcome
    }
}

async fn drain_on_trigger<T: Transport>(
    transport: Arc<T>,
    tasks: TaskRunner,
    mut trigger: ShutdownListener,
    shutdown_timeout: Duration,
    drain_timeout: Option<Duration>,
    state: Arc<watch::Sender<LifecycleState>>,
    outcome_tx: oneshot::Sender<Result<(), LifecycleError>>,
) {
    let reason = trigger.recv().await;
    tracing::info!(signal = %reason, "Shutting down server");
    state.send_replace(LifecycleState::Draining);

    let mut outcome: Result<(), LifecycleError> = transport
        .shutdown(shutdown_timeout)
        .await
        .map_err(Into::into);
    if let Err(e) = &outcome {
        tracing::error!(error = %e, "Listener did not stop cleanly");
    }

    tracing::info!(pending = tasks.pending(), "Completing background tasks");
    let drained = match drain_timeout {
        Some(timeout) => tasks.drain_timeout(timeout).await.map_err(Into::into),
        None => {
            tasks.drain().await;
            Ok(())
        }
    };
    match drained {
        Ok(()) => {}
        Err(e) if outcome.is_ok() => outcome = Err(e),
        Err(e) => tracing::error!(error = %e, "Background tasks did not finish"),
    }

    // The serving path only drops the receiver when it has already failed.
    let _ = outcome_tx.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Transport that serves until shut down and optionally fails.
    struct FakeTransport {
        closed: Notify,
        serve_error: Mutex<Option<std::io::Error>>,
        shutdown_result: Mutex<Option<TransportError>>,
        shutdown_calls: Mutex<u32>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                closed: Notify::new(),
                serve_error: Mutex::new(None),
                shutdown_result: Mutex::new(None),
                shutdown_calls: Mutex::new(0),
            }
        }

        fn failing_serve() -> Self {
            let t = Self::new();
            *t.serve_error.lock().unwrap() = Some(std::io::Error::other("accept failed"));
            t
        }

        fn timing_out() -> Self {
            let t = Self::new();
            *t.shutdown_result.lock().unwrap() =
                Some(TransportError::ShutdownTimeout(Duration::from_secs(5)));
            t
        }
    }

    impl Transport for FakeTransport {
        async fn serve(&self) -> Result<(), TransportError> {
            let err = self.serve_error.lock().unwrap().take();
            if let Some(e) = err {
                return Err(TransportError::Serve(e));
            }
            self.closed.notified().await;
            Ok(())
        }

        async fn shutdown(&self, _timeout: Duration) -> Result<(), TransportError> {
            *self.shutdown_calls.lock().unwrap() += 1;
            self.closed.notify_one();
            let result = self.shutdown_result.lock().unwrap().take();
            match result {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    /// Transport whose single in-flight request submits background work
    /// while the listener is draining.
    struct InFlightTransport {
        closed: Notify,
        tasks: TaskRunner,
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Transport for InFlightTransport {
        async fn serve(&self) -> Result<(), TransportError> {
            self.closed.notified().await;
            Ok(())
        }

        async fn shutdown(&self, _timeout: Duration) -> Result<(), TransportError> {
            self.events.lock().unwrap().push("listener_closed");
            self.closed.notify_one();

            // The request finishes after the listener stopped accepting and
            // fires a notification on its way out.
            tokio::time::sleep(Duration::from_millis(20)).await;
            let events = Arc::clone(&self.events);
            self.tasks.run("notify", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                events.lock().unwrap().push("task_done");
            });
            self.events.lock().unwrap().push("request_done");
            Ok(())
        }
    }

    #[tokio::test]
    async fn listener_stop_precedes_task_drain() {
        let shutdown = Shutdown::new();
        let tasks = TaskRunner::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let transport = InFlightTransport {
            closed: Notify::new(),
            tasks: tasks.clone(),
            events: events.clone(),
        };
        let coordinator = ShutdownCoordinator::new(transport, tasks, shutdown.clone());
        let handle = tokio::spawn(coordinator.run());

        shutdown.trigger(ShutdownReason::Terminate);
        handle.await.unwrap().unwrap();
        events.lock().unwrap().push("exit");

        assert_eq!(
            *events.lock().unwrap(),
            vec!["listener_closed", "request_done", "task_done", "exit"]
        );
    }

    #[tokio::test]
    async fn clean_shutdown_returns_ok() {
        let shutdown = Shutdown::new();
        let coordinator =
            ShutdownCoordinator::new(FakeTransport::new(), TaskRunner::new(), shutdown.clone());
        let mut state = coordinator.state();

        let handle = tokio::spawn(coordinator.run());
        shutdown.trigger(ShutdownReason::Terminate);

        handle.await.unwrap().unwrap();
        assert_eq!(*state.borrow_and_update(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn serve_error_is_fatal_and_skips_drain() {
        let shutdown = Shutdown::new();
        let transport = FakeTransport::failing_serve();
        let coordinator = ShutdownCoordinator::new(transport, TaskRunner::new(), shutdown.clone());
        let state = coordinator.state();
        let transport = Arc::clone(&coordinator.transport);

        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Transport(TransportError::Serve(_))));
        assert_eq!(*state.borrow(), LifecycleState::Failed);
        assert_eq!(*transport.shutdown_calls.lock().unwrap(), 0);
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn listener_timeout_still_drains_tasks() {
        let shutdown = Shutdown::new();
        let tasks = TaskRunner::new();
        let finished = Arc::new(Mutex::new(false));

        let flag = finished.clone();
        tasks.run("slow", async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            *flag.lock().unwrap() = true;
        });

        let coordinator =
            ShutdownCoordinator::new(FakeTransport::timing_out(), tasks, shutdown.clone());
        let handle = tokio::spawn(coordinator.run());
        shutdown.trigger(ShutdownReason::Interrupt);

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Transport(TransportError::ShutdownTimeout(_))
        ));
        assert!(*finished.lock().unwrap());
    }

    #[tokio::test]
    async fn bounded_drain_reports_stuck_task() {
        let shutdown = Shutdown::new();
        let tasks = TaskRunner::new();
        tasks.run("stuck", std::future::pending());

        let coordinator = ShutdownCoordinator::new(FakeTransport::new(), tasks, shutdown.clone())
            .with_drain_timeout(Some(Duration::from_millis(50)));
        let handle = tokio::spawn(coordinator.run());
        shutdown.trigger(ShutdownReason::Requested);

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Drain(TaskError::DrainTimeout { pending: 1, .. })
        ));
    }

    #[tokio::test]
    async fn stopped_is_not_reported_before_drain_completes() {
        let shutdown = Shutdown::new();
        let tasks = TaskRunner::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        tasks.run("held", async move {
            let _ = release_rx.await;
        });

        let coordinator = ShutdownCoordinator::new(FakeTransport::new(), tasks, shutdown.clone());
        let mut state = coordinator.state();
        let handle = tokio::spawn(coordinator.run());
        shutdown.trigger(ShutdownReason::Terminate);

        state
            .wait_for(|s| *s == LifecycleState::Draining)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());
        assert_eq!(*state.borrow(), LifecycleState::Draining);

        release_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(*state.borrow(), LifecycleState::Stopped);
    }
}

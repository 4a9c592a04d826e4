//! Shutdown trigger shared by every long-running task.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Why shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Triggered from code (tests, admin paths).
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "interrupt"),
            ShutdownReason::Terminate => write!(f, "terminated"),
            ShutdownReason::Requested => write!(f, "requested"),
        }
    }
}

/// Cancellation handle for graceful shutdown.
///
/// Any number of producers (the OS signal listener, tests) may call
/// [`Shutdown::trigger`]; only the first reason is kept. Listeners created
/// after the trigger still observe it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Shutdown {
    /// Create a new, untriggered shutdown handle.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the shutdown signal. Returns `false` if it had already fired.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        })
    }

    /// The reason shutdown fired, if it has.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.tx.borrow()
    }

    pub fn is_triggered(&self) -> bool {
        self.reason().is_some()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`Shutdown`] handle.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownListener {
    /// Wait until shutdown is triggered.
    ///
    /// Completes immediately if it already was. If every [`Shutdown`] handle
    /// is dropped without triggering, this never completes.
    pub async fn recv(&mut self) -> ShutdownReason {
        let reason = match self.rx.wait_for(Option::is_some).await {
            Ok(slot) => *slot,
            Err(_) => None,
        };
        match reason {
            Some(reason) => reason,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_untriggered() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        assert_eq!(shutdown.reason(), None);
    }

    #[test]
    fn first_reason_wins() {
        let shutdown = Shutdown::new();
        assert!(shutdown.trigger(ShutdownReason::Terminate));
        assert!(!shutdown.trigger(ShutdownReason::Interrupt));
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Terminate));
    }

    #[test]
    fn clones_share_state() {
        let a = Shutdown::new();
        let b = a.clone();
        b.trigger(ShutdownReason::Requested);
        assert!(a.is_triggered());
    }

    #[tokio::test]
    async fn listener_wakes_on_trigger() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.subscribe();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger(ShutdownReason::Interrupt);
        });

        let reason = tokio::time::timeout(Duration::from_secs(1), listener.recv())
            .await
            .expect("recv should complete");
        assert_eq!(reason, ShutdownReason::Interrupt);
    }

    #[tokio::test]
    async fn late_listener_sees_earlier_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger(ShutdownReason::Requested);

        let mut listener = shutdown.subscribe();
        let reason = tokio::time::timeout(Duration::from_millis(10), listener.recv())
            .await
            .expect("recv should complete immediately");
        assert_eq!(reason, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn dropped_handle_does_not_fire() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.subscribe();
        drop(shutdown);

        let result = tokio::time::timeout(Duration::from_millis(20), listener.recv()).await;
        assert!(result.is_err());
    }
}

//! Fire-and-forget background work.
//!
//! # Responsibilities
//! - Run work that must outlive the request that started it
//! - Keep a failure in that work away from the server and other tasks
//! - Let shutdown wait for everything still outstanding
//!
//! # Design Decisions
//! - The pending count is incremented before `run` returns, so a `drain`
//!   that starts afterwards always sees the task
//! - The count is released by a drop guard: it fires exactly once whether
//!   the task finishes, panics, or is dropped by the runtime
//! - A `watch` channel carries the count so `drain` wakes without polling

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;

use crate::observability::metrics;

/// Errors surfaced by [`TaskRunner`].
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{pending} background task(s) still running after {timeout:?}")]
    DrainTimeout { pending: usize, timeout: Duration },
}

/// Runs background tasks and tracks how many are still outstanding.
///
/// Cloning is cheap; all clones share one pending count.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    pending: Arc<watch::Sender<usize>>,
}

impl TaskRunner {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            pending: Arc::new(tx),
        }
    }

    /// Number of submitted tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Submit a task. Never waits for it.
    ///
    /// A panic inside `task` is caught and logged; it never reaches the
    /// caller or any other task.
    pub fn run<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = PendingGuard::acquire(Arc::clone(&self.pending));
        metrics::record_task_spawned();
        tracing::debug!(task = name, "Spawning background task");

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(payload) = AssertUnwindSafe(task).catch_unwind().await {
                tracing::error!(
                    task = name,
                    panic = %panic_message(payload.as_ref()),
                    "Background task panicked"
                );
                metrics::record_task_failed("panic");
            }
        });
    }

    /// Submit a task whose error is logged rather than returned.
    pub fn run_fallible<F, E>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.run(name, async move {
            if let Err(e) = task.await {
                tracing::error!(task = name, error = %e, "Background task failed");
                metrics::record_task_failed("error");
            }
        });
    }

    /// Wait until no task is pending.
    ///
    /// Tasks submitted while waiting are waited for as well.
    pub async fn drain(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    /// Like [`drain`](Self::drain), but gives up after `timeout`.
    pub async fn drain_timeout(&self, timeout: Duration) -> Result<(), TaskError> {
        tokio::time::timeout(timeout, self.drain())
            .await
            .map_err(|_| TaskError::DrainTimeout {
                pending: self.pending(),
                timeout,
            })
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds one slot of the pending count until dropped.
struct PendingGuard {
    pending: Arc<watch::Sender<usize>>,
}

impl PendingGuard {
    fn acquire(pending: Arc<watch::Sender<usize>>) -> Self {
        pending.send_modify(|count| *count += 1);
        metrics::record_tasks_pending(*pending.borrow());
        Self { pending }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending
            .send_modify(|count| *count = count.saturating_sub(1));
        metrics::record_tasks_pending(*self.pending.borrow());
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn run_counts_before_returning() {
        let runner = TaskRunner::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        runner.run("blocked", async move {
            let _ = release_rx.await;
        });
        assert_eq!(runner.pending(), 1);

        release_tx.send(()).unwrap();
        runner.drain().await;
        assert_eq!(runner.pending(), 0);
    }

    #[tokio::test]
    async fn panic_is_isolated() {
        let runner = TaskRunner::new();
        let completed = Arc::new(AtomicUsize::new(0));

        runner.run("panics", async {
            panic!("boom");
        });

        let done = completed.clone();
        runner.run("survives", async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            done.fetch_add(1, Ordering::SeqCst);
        });

        runner.drain().await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(runner.pending(), 0);
    }

    #[tokio::test]
    async fn panic_releases_pending_exactly_once() {
        let runner = TaskRunner::new();
        for _ in 0..5 {
            runner.run("panics", async {
                panic!("boom");
            });
        }
        runner.drain().await;
        assert_eq!(runner.pending(), 0);

        // The count is still usable after panics.
        runner.run("after", async {});
        runner.drain().await;
        assert_eq!(runner.pending(), 0);
    }

    #[tokio::test]
    async fn fallible_error_is_logged_not_propagated() {
        let runner = TaskRunner::new();
        runner.run_fallible("fails", async { Err::<(), _>("mail server down") });
        runner.drain().await;
        assert_eq!(runner.pending(), 0);
    }

    async fn drain_records_all(n: usize) {
        let runner = TaskRunner::new();
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..n {
            let delay = Duration::from_millis(rand::thread_rng().gen_range(0..50));
            let done = completed.clone();
            runner.run("sleepy", async move {
                tokio::time::sleep(delay).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        runner.drain().await;
        assert_eq!(completed.load(Ordering::SeqCst), n);
    }

    #[tokio::test]
    async fn drain_with_no_tasks_returns() {
        drain_records_all(0).await;
    }

    #[tokio::test]
    async fn drain_waits_for_one_task() {
        drain_records_all(1).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drain_waits_for_hundred_tasks() {
        drain_records_all(100).await;
    }

    #[tokio::test]
    async fn drain_covers_tasks_spawned_by_tasks() {
        let runner = TaskRunner::new();
        let completed = Arc::new(AtomicUsize::new(0));

        let inner_runner = runner.clone();
        let done = completed.clone();
        runner.run("parent", async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            inner_runner.run("child", async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        });

        runner.drain().await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_timeout_reports_stuck_tasks() {
        let runner = TaskRunner::new();
        runner.run("stuck", std::future::pending());

        let err = runner
            .drain_timeout(Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            TaskError::DrainTimeout { pending, timeout } => {
                assert_eq!(pending, 1);
                assert_eq!(timeout, Duration::from_secs(1));
            }
        }
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}

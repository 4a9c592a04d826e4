//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     cancellation handle observed by every long-running task
//!
//! Coordinator (coordinator.rs):
//!     trigger observed → stop listener → drain tasks → report outcome
//!
//! Tasks (tasks.rs):
//!     handlers submit background work; coordinator drains it
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain requests, drain tasks, exit
//! - Listener shutdown has a timeout; task drain is optionally bounded
//! - No global state: every handle is created at startup and passed down

pub mod coordinator;
pub mod shutdown;
pub mod signals;
pub mod tasks;

pub use coordinator::{
    LifecycleError, LifecycleState, ShutdownCoordinator, Transport, TransportError,
};
pub use shutdown::{Shutdown, ShutdownListener, ShutdownReason};
pub use tasks::{TaskError, TaskRunner};

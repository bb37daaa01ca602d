//! Error types for the worker pool.
//!
//! This module defines the central [`Error`] enum, which captures every
//! run-level and construction-time failure the pool can report. Failures of
//! an individual task are *not* errors at this level: they travel as
//! [`TaskFailure`](crate::TaskFailure) values inside the run's output and
//! never abort the run.
//!
//! ## Error Cases
//! - `InvalidConfiguration`: The pool was configured with unusable values.
//! - `RuntimeUnavailable`: The pool was built outside a Tokio runtime.
//! - `RunInProgress`: A run was started while another run owned the pool.
//! - `PoolClosed`: The pool was closed before or during a run.
//! - `WorkerLost`: A worker vanished without reporting its task's outcome.
//! - `ChannelError`: An internal channel between the pool and a worker was
//!   closed.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the worker pool.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The pool configuration is unusable (for example a pool size of 0).
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// No Tokio runtime was available to spawn the workers on.
    #[error("No Tokio runtime available to spawn workers")]
    RuntimeUnavailable,

    /// Another run currently owns the pool.
    #[error("A run is already active on this pool")]
    RunInProgress,

    /// The pool has been closed; no further runs are accepted and any active
    /// run is cancelled.
    #[error("Pool is closed")]
    PoolClosed,

    /// The worker executing task `index` terminated without reporting an
    /// outcome.
    #[error("Worker lost while executing task {index}")]
    WorkerLost { index: usize },

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}

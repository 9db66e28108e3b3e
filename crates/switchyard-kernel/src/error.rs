//! Kernel error types.
//!
//! Every public API in this crate reports failures through [`QueueError`].
//! Errors are always returned synchronously from the call that caused them;
//! nothing is raised from inside a lane's consumer loop.

/// Unified error type for lanes, the scheduler and completions.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    // -- Lifecycle ----------------------------------------------------------
    /// The lane or scheduler was default-constructed and has no backing
    /// storage.  Construct it with `new`/`spawn` before use.
    #[error("{target} has not been initialized")]
    NotInitialized {
        /// What was used uninitialized (e.g. "lane", "scheduler").
        target: &'static str,
    },

    /// The lane has been stopped and no longer accepts work.
    #[error("lane `{lane}` is closed")]
    Closed {
        /// Name of the stopped lane.
        lane: String,
    },

    /// The scheduler has been stopped and will not accept new work.
    #[error("scheduler is already stopped")]
    AlreadyStopped,

    // -- Startup ------------------------------------------------------------
    /// The operating system refused to start a lane thread.
    #[error("failed to spawn lane `{lane}`: {source}")]
    Spawn {
        lane: String,
        #[source]
        source: std::io::Error,
    },

    /// A [`SchedulerConfig`](crate::config::SchedulerConfig) value was
    /// rejected.
    #[error("invalid scheduler config: {reason}")]
    InvalidConfig { reason: String },

    // -- Completions --------------------------------------------------------
    /// The job behind a [`Completion`](crate::completion::Completion) was
    /// dropped or panicked before producing a value.
    #[error("job was abandoned before producing a result")]
    Abandoned,
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, QueueError>;

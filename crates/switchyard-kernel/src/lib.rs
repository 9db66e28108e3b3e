//! Switchyard kernel.
//!
//! In-process task dispatch for event-driven front ends such as websocket
//! connection handlers.  Callers hand over opaque jobs without blocking; the
//! kernel decides where and in what relative order they run.
//!
//! - **[`lane`]** -- Single-consumer FIFO execution lane: a mutex-guarded
//!   queue drained by one dedicated thread, with graceful drain on stop.
//! - **[`scheduler`]** -- One ordered lane plus a round-robin pool of parallel
//!   lanes sized to the machine's available parallelism.
//! - **[`completion`]** -- Awaitable / blocking handles for the return value
//!   of an offloaded closure, backed by [`tokio::sync::oneshot`].
//! - **[`config`]** -- Lane pool configuration with TOML loading.
//! - **[`error`]** -- Unified kernel error type via [`thiserror`].
//!
//! All public handles are `Send + Sync`.

pub mod completion;
pub mod config;
pub mod error;
pub mod job;
pub mod lane;
pub mod scheduler;

// Re-export the most commonly used types at the crate root for convenience.
pub use completion::Completion;
pub use config::SchedulerConfig;
pub use error::{QueueError, Result};
pub use job::{Job, JobFn};
pub use lane::{Lane, LaneStats, LaneWorker};
pub use scheduler::{Scheduler, SchedulerStats};

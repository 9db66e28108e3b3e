//! Switchyard dispatch.
//!
//! Maps inbound message discriminators to registered callbacks and runs them
//! on a [`switchyard_kernel::Scheduler`].  A [`Dispatcher`] is an ordinary
//! value: construct one per server and pass it to whatever owns the
//! connections.
//!
//! - **[`actions`]** -- Concurrent action table backed by [`dashmap::DashMap`].
//! - **[`dispatcher`]** -- Looks up an action and submits it to the ordered
//!   or parallel lanes.
//! - **[`error`]** -- [`DispatchError`] via [`thiserror`].

pub mod actions;
pub mod dispatcher;
pub mod error;

pub use actions::{Action, ActionKey, ActionTable};
pub use dispatcher::{DispatchMode, Dispatcher};
pub use error::{DispatchError, Result};

//! Dispatch error types.

use switchyard_kernel::QueueError;

use crate::actions::ActionKey;

/// Errors returned by the action table and the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// An action is already registered under this key.
    #[error("action already registered: {key}")]
    ActionExists { key: ActionKey },

    /// No action is registered under this key.
    #[error("action not found: {key}")]
    ActionNotFound { key: ActionKey },

    /// The scheduler refused the invocation.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Convenience alias used throughout the dispatch crate.
pub type Result<T> = std::result::Result<T, DispatchError>;

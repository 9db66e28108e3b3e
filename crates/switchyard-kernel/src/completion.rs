//! Result handles for offloaded work.
//!
//! Lanes run fire-and-forget jobs.  When the caller needs the value a job
//! computes, [`Scheduler::spawn_parallel`](crate::scheduler::Scheduler::spawn_parallel)
//! and [`Scheduler::spawn_ordered`](crate::scheduler::Scheduler::spawn_ordered)
//! wrap the closure in a job that reports through a
//! [`tokio::sync::oneshot`] channel and hand back a [`Completion`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{QueueError, Result};
use crate::job::Job;

/// Pending result of a job submitted through one of the `spawn_*` methods.
///
/// Await it from async code or call [`Completion::wait`] from a plain
/// thread.  Resolves to [`QueueError::Abandoned`] if the job panicked or was
/// dropped before producing a value.
#[derive(Debug)]
#[must_use = "a Completion does nothing unless awaited or waited on"]
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
}

impl<T: Send + 'static> Completion<T> {
    /// Build the job that runs `work` and the handle that receives its value.
    pub(crate) fn job<F>(work: F) -> (Job, Self)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = Job::new(move || {
            // The caller may have dropped the handle; the value is discarded.
            let _ = tx.send(work());
        });
        (job, Self { rx })
    }
}

impl<T> Completion<T> {
    /// Block the current thread until the job has run.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context;
    /// `.await` the completion there instead.
    pub fn wait(self) -> Result<T> {
        self.rx.blocking_recv().map_err(|_| QueueError::Abandoned)
    }

    /// Take the value if the job has already finished, without blocking.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(value) => Some(Ok(value)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(QueueError::Abandoned)),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| QueueError::Abandoned))
    }
}

//! Work items.
//!
//! A [`Job`] is an opaque deferred action: no input, no output, invoked at
//! most once.  Jobs carry an optional label that only shows up in log output
//! and in [`Lane::peek`](crate::lane::Lane::peek) inspection.

use std::borrow::Cow;
use std::fmt;

/// The boxed closure a job wraps.
pub type JobFn = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work waiting on a lane.
pub struct Job {
    label: Option<Cow<'static, str>>,
    work: JobFn,
}

impl Job {
    /// Wrap a closure as an unlabelled job.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            label: None,
            work: Box::new(work),
        }
    }

    /// Attach a diagnostic label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The diagnostic label, if one was attached.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Consume the job and invoke it.
    pub fn run(self) {
        (self.work)();
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

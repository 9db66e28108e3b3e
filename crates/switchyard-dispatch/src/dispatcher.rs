//! Action dispatcher.
//!
//! Couples an [`ActionTable`] with a [`Scheduler`].  The connection layer
//! decodes the action key from an inbound message and calls
//! [`Dispatcher::dispatch`]; the callback then runs on a lane thread and the
//! connection task goes straight back to reading.

use switchyard_kernel::{Job, Scheduler};

use crate::actions::{ActionKey, ActionTable};
use crate::error::Result;

/// Which lanes an action invocation goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Round-robin over the parallel pool; no ordering between invocations.
    #[default]
    Parallel,
    /// The ordered lane; invocations run in dispatch order.
    Ordered,
}

/// Routes action keys to their callbacks on a scheduler.
///
/// Cheaply cloneable; clones share the table and the lanes.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    actions: ActionTable,
    scheduler: Scheduler,
}

impl Dispatcher {
    /// Create a dispatcher with an empty action table.
    pub fn new(scheduler: Scheduler) -> Self {
        Self::with_actions(scheduler, ActionTable::new())
    }

    /// Create a dispatcher over an existing action table.
    pub fn with_actions(scheduler: Scheduler, actions: ActionTable) -> Self {
        Self { actions, scheduler }
    }

    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Queue one invocation of the action registered under `key`.
    ///
    /// The lookup happens now; replacing the action afterwards does not affect
    /// an invocation that is already queued.
    pub fn dispatch(&self, key: ActionKey, mode: DispatchMode) -> Result<()> {
        let action = self.actions.get(key)?;
        let job = Job::new(move || action()).with_label(format!("action-{key}"));

        match mode {
            DispatchMode::Parallel => self.scheduler.submit_parallel_job(job)?,
            DispatchMode::Ordered => self.scheduler.submit_ordered_job(job)?,
        }

        tracing::trace!(action = key, ?mode, "action dispatched");
        Ok(())
    }

    /// Stop the scheduler, waiting for queued invocations to finish.
    pub fn shutdown(&self) {
        tracing::info!(actions = self.actions.len(), "dispatcher shutting down");
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use switchyard_kernel::{QueueError, SchedulerConfig};

    use crate::error::DispatchError;

    fn dispatcher() -> Dispatcher {
        let config = SchedulerConfig::new().with_parallel_lanes(2);
        Dispatcher::new(Scheduler::with_config(&config).unwrap())
    }

    #[test]
    fn dispatch_runs_registered_action() {
        let dispatcher = dispatcher();
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        dispatcher
            .actions()
            .add_action(1, move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        for _ in 0..5 {
            dispatcher.dispatch(1, DispatchMode::Parallel).unwrap();
        }
        dispatcher.shutdown();

        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn ordered_dispatch_keeps_order() {
        let dispatcher = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));

        for key in 1..=3 {
            let l = Arc::clone(&log);
            dispatcher
                .actions()
                .add_action(key, move || l.lock().unwrap().push(key))
                .unwrap();
        }

        for key in [3, 1, 2, 1] {
            dispatcher.dispatch(key, DispatchMode::Ordered).unwrap();
        }
        dispatcher.shutdown();

        assert_eq!(*log.lock().unwrap(), vec![3, 1, 2, 1]);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let dispatcher = dispatcher();
        let err = dispatcher.dispatch(404, DispatchMode::default()).unwrap_err();
        assert!(matches!(err, DispatchError::ActionNotFound { key: 404 }));
        dispatcher.shutdown();
    }

    #[test]
    fn dispatch_after_shutdown_surfaces_queue_error() {
        let dispatcher = dispatcher();
        dispatcher.actions().add_action(1, || {}).unwrap();
        dispatcher.shutdown();

        let err = dispatcher.dispatch(1, DispatchMode::Ordered).unwrap_err();
        assert!(matches!(err, DispatchError::Queue(QueueError::AlreadyStopped)));
    }

    #[test]
    fn uninitialized_scheduler_is_reported() {
        let dispatcher = Dispatcher::new(Scheduler::default());
        dispatcher.actions().add_action(1, || {}).unwrap();

        let err = dispatcher.dispatch(1, DispatchMode::Parallel).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Queue(QueueError::NotInitialized { .. })
        ));
    }
}

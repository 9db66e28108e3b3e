//! Single-consumer FIFO execution lanes.
//!
//! A lane is a mutex-guarded [`VecDeque`] of [`Job`]s paired with a
//! [`crossbeam::channel`] of wake signals.  Producers call [`Lane::enqueue`]
//! from any thread; exactly one [`LaneWorker`] drains the queue and runs the
//! jobs in insertion order.
//!
//! # Signalling
//!
//! Pushing a job and emitting its wake signal happen under the same lock.
//! When the worker finds the queue empty it discards the wake signals that are
//! still buffered (while holding that lock), so a burst of `N` submissions
//! that lands during a drain is handled by that one drain pass instead of `N`
//! empty ones.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized (Lane::default)        -- rejects enqueue/peek
//! Running       (Lane::new/spawn)      -- accepts work
//! Stopped       (Lane::stop, terminal) -- final drain, then the worker exits
//! ```
//!
//! Stopping is graceful: every job enqueued before [`Lane::stop`] was called
//! runs exactly once before the worker exits.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};
use crate::job::Job;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Point-in-time counters for one lane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneStats {
    /// Lane name (empty for an uninitialized lane).
    pub name: String,
    /// Jobs currently waiting in the queue.
    pub queued: usize,
    /// Jobs accepted by `enqueue` over the lane's lifetime.
    pub submitted: u64,
    /// Jobs the worker has invoked, including the ones that panicked.
    pub executed: u64,
    /// Jobs that panicked while running.
    pub panicked: u64,
    /// `false` once the lane has been stopped.
    pub open: bool,
}

enum Signal {
    Wake,
    Stop,
}

struct LaneState {
    jobs: VecDeque<Job>,
    open: bool,
}

struct LaneShared {
    name: String,
    state: Mutex<LaneState>,
    signals: Sender<Signal>,
    /// Thread currently running [`LaneWorker::run`].
    consumer: OnceLock<ThreadId>,
    submitted: AtomicU64,
    executed: AtomicU64,
    panicked: AtomicU64,
}

impl LaneShared {
    fn lock(&self) -> MutexGuard<'_, LaneState> {
        // Jobs never run while the lock is held, so a poisoned lock still
        // guards a consistent queue.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the lane and queue the stop signal.  No-op once closed.
    fn request_stop(&self) {
        let mut state = self.lock();
        if !state.open {
            return;
        }
        state.open = false;
        // The worker may already be gone; there is nothing left to stop then.
        let _ = self.signals.send(Signal::Stop);
        tracing::debug!(lane = %self.name, queued = state.jobs.len(), "lane stop requested");
    }

    fn on_consumer_thread(&self) -> bool {
        self.consumer.get() == Some(&thread::current().id())
    }
}

struct LaneHandle {
    shared: Arc<LaneShared>,
    /// Disconnects when the worker is dropped, i.e. when `run` has returned.
    exited: Receiver<()>,
}

// ---------------------------------------------------------------------------
// Lane (producer side)
// ---------------------------------------------------------------------------

/// Producer handle of an execution lane.
///
/// `Lane::default()` is the uninitialized lane: it owns no queue and rejects
/// every operation except [`is_empty`](Self::is_empty), [`len`](Self::len)
/// and [`stop`](Self::stop).
#[derive(Default)]
pub struct Lane {
    handle: Option<LaneHandle>,
}

impl Lane {
    /// Create a running lane and return its single consumer.
    ///
    /// The caller decides where [`LaneWorker::run`] executes.  Until the
    /// worker runs (or is dropped), [`Lane::stop`] blocks.
    pub fn new(name: impl Into<String>) -> (Self, LaneWorker) {
        let (signal_tx, signal_rx) = channel::unbounded();
        let (exit_tx, exit_rx) = channel::bounded(0);

        let shared = Arc::new(LaneShared {
            name: name.into(),
            state: Mutex::new(LaneState {
                jobs: VecDeque::new(),
                open: true,
            }),
            signals: signal_tx,
            consumer: OnceLock::new(),
            submitted: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        });

        let lane = Self {
            handle: Some(LaneHandle {
                shared: Arc::clone(&shared),
                exited: exit_rx,
            }),
        };
        let worker = LaneWorker {
            shared,
            signals: signal_rx,
            _exit: exit_tx,
        };
        (lane, worker)
    }

    /// Create a lane and start its worker on a dedicated, named OS thread.
    ///
    /// `stack_size` overrides the platform default thread stack size.  A name
    /// containing a nul byte is rejected with [`QueueError::Spawn`].
    pub fn spawn(name: impl Into<String>, stack_size: Option<usize>) -> Result<Self> {
        let name = name.into();
        if name.contains('\0') {
            return Err(QueueError::Spawn {
                lane: name.replace('\0', "\\0"),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "lane name contains a nul byte",
                ),
            });
        }
        let (lane, worker) = Self::new(name.clone());

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        builder
            .spawn(move || worker.run())
            .map_err(|source| QueueError::Spawn { lane: name, source })?;

        Ok(lane)
    }

    /// Lane name, or `None` for an uninitialized lane.
    pub fn name(&self) -> Option<&str> {
        self.handle.as_ref().map(|h| h.shared.name.as_str())
    }

    /// Append a closure to the tail of the lane.
    pub fn enqueue<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_job(Job::new(work))
    }

    /// Append a prepared [`Job`] to the tail of the lane.
    ///
    /// Fails with [`QueueError::NotInitialized`] on a default lane and with
    /// [`QueueError::Closed`] once the lane has been stopped.
    pub fn enqueue_job(&self, job: Job) -> Result<()> {
        let shared = &self.handle()?.shared;
        let mut state = shared.lock();

        if !state.open {
            tracing::warn!(lane = %shared.name, "enqueue rejected: lane closed");
            return Err(QueueError::Closed {
                lane: shared.name.clone(),
            });
        }

        tracing::trace!(lane = %shared.name, job = ?job.label(), "job enqueued");
        state.jobs.push_back(job);

        if shared.signals.send(Signal::Wake).is_err() {
            // The worker was dropped without running; nothing will drain us.
            state.jobs.pop_back();
            state.open = false;
            tracing::warn!(lane = %shared.name, "enqueue rejected: lane worker is gone");
            return Err(QueueError::Closed {
                lane: shared.name.clone(),
            });
        }

        shared.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Inspect the head job without removing it.
    ///
    /// `inspect` runs while the lane lock is held and must not touch this
    /// lane.
    pub fn peek<R>(&self, inspect: impl FnOnce(&Job) -> R) -> Result<Option<R>> {
        let shared = &self.handle()?.shared;
        let state = shared.lock();
        Ok(state.jobs.front().map(inspect))
    }

    /// `true` when nothing is queued.  Always `true` for an uninitialized lane.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queued jobs.  Always `0` for an uninitialized lane.
    pub fn len(&self) -> usize {
        self.handle
            .as_ref()
            .map_or(0, |h| h.shared.lock().jobs.len())
    }

    /// Stop the lane and block until its worker has exited.
    ///
    /// The worker drains everything enqueued before this call first.
    /// Repeated calls are a no-op, as is stopping an uninitialized lane.
    /// When called from a job running on this lane, the stop is requested
    /// but not awaited; the worker exits after its current drain.
    pub fn stop(&self) {
        let Some(handle) = &self.handle else {
            return;
        };

        handle.shared.request_stop();

        if handle.shared.on_consumer_thread() {
            tracing::debug!(lane = %handle.shared.name, "stop called from lane worker; not waiting");
            return;
        }

        // Never receives a value; returns once the worker's sender is dropped.
        let _ = handle.exited.recv();
        tracing::info!(lane = %handle.shared.name, "lane stopped");
    }

    /// Close the lane and queue its stop signal without waiting for the
    /// worker.  No-op on an uninitialized or already stopped lane.
    pub(crate) fn request_stop(&self) {
        if let Some(handle) = &self.handle {
            handle.shared.request_stop();
        }
    }

    /// `true` when called from a job running on this lane.
    pub(crate) fn on_consumer_thread(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.shared.on_consumer_thread())
    }

    /// Snapshot the lane's counters.
    pub fn stats(&self) -> LaneStats {
        let Some(handle) = &self.handle else {
            return LaneStats::default();
        };
        let shared = &handle.shared;
        let state = shared.lock();

        LaneStats {
            name: shared.name.clone(),
            queued: state.jobs.len(),
            submitted: shared.submitted.load(Ordering::Relaxed),
            executed: shared.executed.load(Ordering::Relaxed),
            panicked: shared.panicked.load(Ordering::Relaxed),
            open: state.open,
        }
    }

    fn handle(&self) -> Result<&LaneHandle> {
        self.handle
            .as_ref()
            .ok_or(QueueError::NotInitialized { target: "lane" })
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        // Let the worker finish its queue and exit instead of parking forever.
        if let Some(handle) = &self.handle {
            handle.shared.request_stop();
        }
    }
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane")
            .field("name", &self.name())
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LaneWorker (consumer side)
// ---------------------------------------------------------------------------

/// The one consumer of a lane.
///
/// Owning the worker is what grants the right to dequeue; it is not `Clone`.
pub struct LaneWorker {
    shared: Arc<LaneShared>,
    signals: Receiver<Signal>,
    _exit: Sender<()>,
}

impl LaneWorker {
    /// Remove and return the head job, or `None` if the lane is empty.
    pub fn dequeue(&self) -> Option<Job> {
        self.shared.lock().jobs.pop_front()
    }

    /// Run the consumer loop until the lane is stopped.
    ///
    /// Each wake signal triggers a full drain.  The stop signal triggers one
    /// final drain, after which the loop returns and the worker is dropped.
    pub fn run(self) {
        let _ = self.shared.consumer.set(thread::current().id());
        tracing::info!(lane = %self.shared.name, "lane worker started");

        loop {
            match self.signals.recv() {
                Ok(Signal::Wake) => {
                    if self.drain() {
                        break;
                    }
                }
                Ok(Signal::Stop) | Err(_) => {
                    self.drain();
                    break;
                }
            }
        }

        tracing::info!(
            lane = %self.shared.name,
            executed = self.shared.executed.load(Ordering::Relaxed),
            "lane worker exited"
        );
    }

    /// Run jobs until the queue is empty.  Returns `true` if a stop signal
    /// was consumed along the way.
    fn drain(&self) -> bool {
        let mut stop_requested = false;
        let mut drained = 0u64;

        loop {
            let job = {
                let mut state = self.shared.lock();
                match state.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        // Every buffered wake belongs to a job popped above.
                        for signal in self.signals.try_iter() {
                            if matches!(signal, Signal::Stop) {
                                stop_requested = true;
                            }
                        }
                        break;
                    }
                }
            };

            self.execute(job);
            drained += 1;
        }

        if drained > 0 {
            tracing::trace!(lane = %self.shared.name, drained, "lane drained");
        }
        stop_requested
    }

    fn execute(&self, job: Job) {
        let label = job.label().map(str::to_owned);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run()));
        self.shared.executed.fetch_add(1, Ordering::Relaxed);

        if let Err(payload) = outcome {
            self.shared.panicked.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                lane = %self.shared.name,
                job = ?label,
                panic = %panic_message(&*payload),
                "job panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "<non-string panic payload>"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

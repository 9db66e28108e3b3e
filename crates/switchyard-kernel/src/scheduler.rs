//! Ordered + parallel lane scheduler.
//!
//! The scheduler owns one **ordered** lane and a pool of **parallel** lanes,
//! each drained by its own OS thread (see [`crate::lane`]).
//!
//! # Ordering model
//!
//! - [`Scheduler::submit_ordered`] puts every job on the single ordered lane,
//!   so ordered jobs run one at a time in submission order, whichever thread
//!   submitted them.
//! - [`Scheduler::submit_parallel`] hands jobs to the parallel pool in strict
//!   round robin.  Jobs on different parallel lanes run concurrently with no
//!   relative ordering; jobs on the same lane keep FIFO order.
//!
//! A slow job only delays the lane it landed on.
//!
//! # Shutdown
//!
//! [`Scheduler::stop`] stops the ordered lane, then the parallel lanes in
//! index order, and returns once every lane worker has drained its queue and
//! exited.  Submissions after that are rejected with
//! [`QueueError::AlreadyStopped`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::completion::Completion;
use crate::config::SchedulerConfig;
use crate::error::{QueueError, Result};
use crate::job::Job;
use crate::lane::{Lane, LaneStats};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Snapshot of every lane owned by a scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ordered: LaneStats,
    /// Parallel lanes in index order.
    pub parallel: Vec<LaneStats>,
    pub stopped: bool,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Dispatches jobs onto one ordered lane and `N` parallel lanes.
///
/// The scheduler is cheaply cloneable (`Arc`-backed); all clones share the
/// same lanes.  `Scheduler::default()` is uninitialized and rejects every
/// submission with [`QueueError::NotInitialized`].
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Option<Arc<SchedulerInner>>,
}

struct SchedulerInner {
    ordered: Lane,
    parallel: Vec<Lane>,

    /// Index of the next parallel lane, always in `[0, parallel.len())`.
    cursor: AtomicUsize,

    /// Set at the start of `stop`; checked before every submission.
    stopped: AtomicBool,
}

impl Scheduler {
    /// Start a scheduler with one parallel lane per available processing
    /// unit.
    pub fn new() -> Result<Self> {
        Self::with_config(&SchedulerConfig::default())
    }

    /// Start a scheduler from an explicit [`SchedulerConfig`].
    ///
    /// All `N + 1` lane threads are running when this returns.  If any lane
    /// fails to spawn, the lanes started so far are stopped and the error is
    /// returned.
    pub fn with_config(config: &SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let lanes = config.resolved_parallel_lanes();

        let ordered = Lane::spawn(config.ordered_lane_name(), config.stack_size)?;

        let mut parallel = Vec::with_capacity(lanes);
        for index in 0..lanes {
            match Lane::spawn(config.parallel_lane_name(index), config.stack_size) {
                Ok(lane) => parallel.push(lane),
                Err(err) => {
                    tracing::error!(index, error = %err, "failed to start parallel lane");
                    ordered.stop();
                    for lane in &parallel {
                        lane.stop();
                    }
                    return Err(err);
                }
            }
        }

        tracing::info!(
            parallel_lanes = lanes,
            prefix = %config.thread_name_prefix,
            "scheduler started"
        );

        Ok(Self {
            inner: Some(Arc::new(SchedulerInner {
                ordered,
                parallel,
                cursor: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
            })),
        })
    }

    /// Run `work` on the next parallel lane in round-robin order.
    ///
    /// Returns as soon as the job is queued.
    pub fn submit_parallel<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_parallel_job(Job::new(work))
    }

    /// [`submit_parallel`](Self::submit_parallel) for a prepared [`Job`].
    pub fn submit_parallel_job(&self, job: Job) -> Result<()> {
        let inner = self.running()?;
        let lane = inner.next_parallel_lane();
        tracing::debug!(lane = ?lane.name(), job = ?job.label(), "parallel job submitted");
        lane.enqueue_job(job).map_err(closed_as_stopped)
    }

    /// Run `work` on the ordered lane, after every previously submitted
    /// ordered job.
    pub fn submit_ordered<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_ordered_job(Job::new(work))
    }

    /// [`submit_ordered`](Self::submit_ordered) for a prepared [`Job`].
    pub fn submit_ordered_job(&self, job: Job) -> Result<()> {
        let inner = self.running()?;
        tracing::debug!(job = ?job.label(), "ordered job submitted");
        inner.ordered.enqueue_job(job).map_err(closed_as_stopped)
    }

    /// Like [`submit_parallel`](Self::submit_parallel), but hands back a
    /// [`Completion`] for the closure's return value.
    pub fn spawn_parallel<F, T>(&self, work: F) -> Result<Completion<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, completion) = Completion::job(work);
        self.submit_parallel_job(job)?;
        Ok(completion)
    }

    /// Like [`submit_ordered`](Self::submit_ordered), but hands back a
    /// [`Completion`] for the closure's return value.
    pub fn spawn_ordered<F, T>(&self, work: F) -> Result<Completion<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, completion) = Completion::job(work);
        self.submit_ordered_job(job)?;
        Ok(completion)
    }

    /// Stop every lane and block until all lane workers have exited.
    ///
    /// Everything submitted before this call runs first.  Calling it again
    /// (from any clone) is a no-op, as is stopping an uninitialized
    /// scheduler.
    ///
    /// Called from a job running on one of this scheduler's lanes, `stop`
    /// closes every lane and returns without waiting; the lanes drain and
    /// exit once the calling job returns.
    pub fn stop(&self) {
        let Some(inner) = &self.inner else {
            return;
        };

        if !inner.stopped.swap(true, Ordering::AcqRel) {
            tracing::info!("scheduler shutdown requested");
        }

        if inner.lanes().any(Lane::on_consumer_thread) {
            for lane in inner.lanes() {
                lane.request_stop();
            }
            tracing::debug!("stop called from a lane job; not waiting for lanes");
            return;
        }

        inner.ordered.stop();
        for lane in &inner.parallel {
            lane.stop();
        }

        tracing::info!("scheduler stopped");
    }

    /// `true` once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.stopped.load(Ordering::Acquire))
    }

    /// Size of the parallel lane pool (`0` when uninitialized).
    pub fn parallel_lanes(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.parallel.len())
    }

    /// Snapshot the counters of every lane.
    pub fn stats(&self) -> SchedulerStats {
        let Some(inner) = &self.inner else {
            return SchedulerStats::default();
        };

        SchedulerStats {
            ordered: inner.ordered.stats(),
            parallel: inner.parallel.iter().map(Lane::stats).collect(),
            stopped: inner.stopped.load(Ordering::Acquire),
        }
    }

    // -- Private helpers ----------------------------------------------------

    fn running(&self) -> Result<&SchedulerInner> {
        let inner = self
            .inner
            .as_deref()
            .ok_or(QueueError::NotInitialized { target: "scheduler" })?;

        if inner.stopped.load(Ordering::Acquire) {
            tracing::warn!("submission rejected: scheduler stopped");
            return Err(QueueError::AlreadyStopped);
        }
        Ok(inner)
    }
}

impl SchedulerInner {
    /// The ordered lane followed by the parallel lanes in index order.
    fn lanes(&self) -> impl Iterator<Item = &Lane> {
        std::iter::once(&self.ordered).chain(&self.parallel)
    }

    /// Claim the lane under the cursor and advance it by one, modulo `N`.
    fn next_parallel_lane(&self) -> &Lane {
        let lanes = self.parallel.len();
        let index = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + 1) % lanes)
            }) {
            Ok(previous) | Err(previous) => previous,
        };
        &self.parallel[index]
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("parallel_lanes", &self.parallel_lanes())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A lane that closed under a racing submission means the scheduler stopped.
fn closed_as_stopped(err: QueueError) -> QueueError {
    match err {
        QueueError::Closed { .. } => QueueError::AlreadyStopped,
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::thread;
    use std::time::Duration;

    fn scheduler_with(lanes: usize, prefix: &str) -> Scheduler {
        let config = SchedulerConfig::new()
            .with_parallel_lanes(lanes)
            .with_thread_name_prefix(prefix);
        Scheduler::with_config(&config).expect("scheduler should start")
    }

    fn current_thread_name() -> String {
        thread::current().name().unwrap_or_default().to_string()
    }

    #[test]
    fn default_scheduler_is_not_initialized() {
        let scheduler = Scheduler::default();

        let err = scheduler.submit_parallel(|| {}).unwrap_err();
        assert!(matches!(err, QueueError::NotInitialized { target: "scheduler" }));
        let err = scheduler.submit_ordered(|| {}).unwrap_err();
        assert!(matches!(err, QueueError::NotInitialized { .. }));

        assert_eq!(scheduler.parallel_lanes(), 0);
        assert!(!scheduler.is_stopped());
        assert_eq!(scheduler.stats(), SchedulerStats::default());
        scheduler.stop();
    }

    #[test]
    fn auto_sized_pool_matches_hardware() {
        let scheduler = Scheduler::new().unwrap();
        let expected = thread::available_parallelism().map_or(1, |n| n.get());
        assert_eq!(scheduler.parallel_lanes(), expected);
        scheduler.stop();
    }

    #[test]
    fn two_lane_round_robin_scenario() {
        let scheduler = scheduler_with(2, "rr");
        let parallel = Arc::new(Mutex::new(Vec::new()));
        let ordered = Arc::new(Mutex::new(Vec::new()));

        for item in ["A", "B", "C", "D"] {
            let p = Arc::clone(&parallel);
            scheduler
                .submit_parallel(move || p.lock().unwrap().push((current_thread_name(), item)))
                .unwrap();
        }
        for item in ["E", "F"] {
            let o = Arc::clone(&ordered);
            scheduler
                .submit_ordered(move || o.lock().unwrap().push(item))
                .unwrap();
        }

        scheduler.stop();

        let parallel = parallel.lock().unwrap().clone();
        assert_eq!(parallel.len(), 4);
        let on_lane = |lane: &str| -> Vec<&str> {
            parallel
                .iter()
                .filter(|(name, _)| name == lane)
                .map(|(_, item)| *item)
                .collect()
        };
        assert_eq!(on_lane("rr-parallel-0"), vec!["A", "C"]);
        assert_eq!(on_lane("rr-parallel-1"), vec!["B", "D"]);
        assert_eq!(*ordered.lock().unwrap(), vec!["E", "F"]);
    }

    #[test]
    fn round_robin_is_exact_over_k_rounds() {
        let scheduler = scheduler_with(3, "fair");
        for _ in 0..30 {
            scheduler.submit_parallel(|| {}).unwrap();
        }
        scheduler.stop();

        let stats = scheduler.stats();
        assert_eq!(stats.parallel.len(), 3);
        for lane in &stats.parallel {
            assert_eq!(lane.submitted, 10, "lane {} skewed", lane.name);
            assert_eq!(lane.executed, 10);
        }
        assert_eq!(stats.ordered.submitted, 0);
    }

    #[test]
    fn round_robin_holds_under_concurrent_submitters() {
        let scheduler = scheduler_with(4, "race");

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = scheduler.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        scheduler.submit_parallel(|| {}).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        scheduler.stop();

        for lane in scheduler.stats().parallel {
            assert_eq!(lane.submitted, 25);
        }
    }

    #[test]
    fn ordered_lane_follows_submission_order_across_threads() {
        let scheduler = scheduler_with(2, "fifo");
        let executed = Arc::new(Mutex::new(Vec::new()));
        // Holding `sequence` across the submit makes the call order observable.
        let sequence = Arc::new(Mutex::new(0u32));

        let producers: Vec<_> = (0..6)
            .map(|_| {
                let scheduler = scheduler.clone();
                let executed = Arc::clone(&executed);
                let sequence = Arc::clone(&sequence);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let mut next = sequence.lock().unwrap();
                        let seq = *next;
                        *next += 1;
                        let e = Arc::clone(&executed);
                        scheduler
                            .submit_ordered(move || e.lock().unwrap().push(seq))
                            .unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        scheduler.stop();

        let observed = executed.lock().unwrap().clone();
        assert_eq!(observed, (0..300).collect::<Vec<_>>());
    }

    #[test]
    fn stop_waits_for_every_submitted_job() {
        let scheduler = scheduler_with(2, "drain");
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..20 {
            let c = Arc::clone(&counter);
            scheduler
                .submit_parallel(move || {
                    thread::sleep(Duration::from_millis(2));
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            let c = Arc::clone(&counter);
            scheduler
                .submit_ordered(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        scheduler.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 40);

        let stats = scheduler.stats();
        assert!(stats.stopped);
        assert!(!stats.ordered.open);
        assert!(stats.parallel.iter().all(|lane| !lane.open && lane.queued == 0));
    }

    #[test]
    fn submit_after_stop_is_rejected() {
        let scheduler = scheduler_with(2, "late");
        scheduler.stop();
        assert!(scheduler.is_stopped());

        let ran = Arc::new(AtomicU32::new(0));
        let r = Arc::clone(&ran);
        let err = scheduler
            .submit_parallel(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap_err();
        assert!(matches!(err, QueueError::AlreadyStopped));

        let err = scheduler.submit_ordered(|| {}).unwrap_err();
        assert!(matches!(err, QueueError::AlreadyStopped));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_is_idempotent_across_clones() {
        let scheduler = scheduler_with(1, "twice");
        let clone = scheduler.clone();

        scheduler.submit_ordered(|| {}).unwrap();
        clone.stop();
        scheduler.stop();

        assert!(scheduler.is_stopped());
        assert_eq!(scheduler.stats().ordered.executed, 1);
        assert!(matches!(
            scheduler.submit_parallel(|| {}),
            Err(QueueError::AlreadyStopped)
        ));
    }

    #[test]
    fn concurrent_stop_from_parallel_jobs_does_not_deadlock() {
        let scheduler = scheduler_with(2, "mutual");
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let (done_tx, done_rx) = crossbeam::channel::unbounded();

        for lane in 0..2 {
            let scheduler_in_job = scheduler.clone();
            let barrier = Arc::clone(&barrier);
            let done_tx = done_tx.clone();
            scheduler
                .submit_parallel(move || {
                    barrier.wait();
                    scheduler_in_job.stop();
                    let _ = done_tx.send(lane);
                })
                .unwrap();
        }

        for _ in 0..2 {
            done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("stop from a lane job returned");
        }

        scheduler.stop();
        let stats = scheduler.stats();
        assert!(stats.stopped);
        assert!(!stats.ordered.open);
        assert!(stats.parallel.iter().all(|lane| !lane.open && lane.executed == 1));
    }

    #[test]
    fn stop_from_ordered_job_still_drains_parallel_lanes() {
        let scheduler = scheduler_with(2, "inner-stop");
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..10 {
            let c = Arc::clone(&counter);
            scheduler
                .submit_parallel(move || {
                    thread::sleep(Duration::from_millis(1));
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        let scheduler_in_job = scheduler.clone();
        scheduler
            .submit_ordered(move || scheduler_in_job.stop())
            .unwrap();

        // Blocks until every lane, including the ordered one, has exited.
        scheduler.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(matches!(
            scheduler.submit_ordered(|| {}),
            Err(QueueError::AlreadyStopped)
        ));
    }

    #[test]
    fn blocked_parallel_lane_does_not_delay_ordered_lane() {
        let scheduler = scheduler_with(1, "isolated");
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        let (ordered_tx, ordered_rx) = crossbeam::channel::bounded(1);

        scheduler
            .submit_parallel(move || {
                let _ = release_rx.recv();
            })
            .unwrap();
        scheduler
            .submit_ordered(move || {
                let _ = ordered_tx.send(());
            })
            .unwrap();

        ordered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("ordered lane ran while the parallel lane was blocked");

        release_tx.send(()).unwrap();
        scheduler.stop();
    }

    #[test]
    fn spawn_parallel_returns_value() {
        let scheduler = scheduler_with(2, "value");
        let completion = scheduler.spawn_parallel(|| 2 + 2).unwrap();
        assert_eq!(completion.wait().unwrap(), 4);
        scheduler.stop();
    }

    #[test]
    fn panicking_spawn_is_abandoned_and_lane_survives() {
        let scheduler = scheduler_with(1, "abandon");
        let completion = scheduler
            .spawn_parallel(|| -> u32 { panic!("handler failed") })
            .unwrap();
        assert!(matches!(completion.wait(), Err(QueueError::Abandoned)));

        let after = scheduler.spawn_parallel(|| "still running").unwrap();
        assert_eq!(after.wait().unwrap(), "still running");

        scheduler.stop();
        assert_eq!(scheduler.stats().parallel[0].panicked, 1);
    }

    #[tokio::test]
    async fn spawn_ordered_can_be_awaited() {
        let scheduler = scheduler_with(2, "async");

        let first = scheduler.spawn_ordered(|| "first").unwrap();
        let second = scheduler.spawn_ordered(|| "second").unwrap();
        assert_eq!(first.await.unwrap(), "first");
        assert_eq!(second.await.unwrap(), "second");

        let stopper = scheduler.clone();
        tokio::task::spawn_blocking(move || stopper.stop())
            .await
            .expect("stop should not panic");
        assert!(matches!(
            scheduler.spawn_ordered(|| ()),
            Err(QueueError::AlreadyStopped)
        ));
    }

    #[test]
    fn stats_serialize_for_diagnostics() {
        let scheduler = scheduler_with(2, "stats");
        scheduler.submit_ordered(|| {}).unwrap();
        scheduler.stop();

        let json = serde_json::to_value(scheduler.stats()).unwrap();
        assert_eq!(json["ordered"]["name"], "stats-ordered");
        assert_eq!(json["ordered"]["executed"], 1);
        assert_eq!(json["parallel"].as_array().unwrap().len(), 2);
        assert_eq!(json["stopped"], true);
    }
}

//! The snippet engine: queues work units, runs them as isolated processes
//! and routes each result back to the node that asked for it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use rustc_hash::FxHashMap;

use crate::config::{CommandProvider, EngineConfig, Scheduling};
use crate::error::Result;
use crate::protocol::{JsonDecoder, ResultDecoder, SnippetResult};

use super::callbacks::{
    EngineListener, JobOwner, Messenger, ProgressReporter, TracingMessenger, guarded,
};
use super::job::{ExecutionJob, JobState};
use super::schedule::{Dispatcher, Task};
use super::unit::{UnitId, WorkUnit};

/// Handle returned by [`SnippetEngine::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct TrackedJob {
    job: Arc<ExecutionJob>,
    /// Batch the job was dispatched in; `None` while it is queued.
    batch: Option<u64>,
}

struct Batch {
    label: String,
    total: usize,
    finished: usize,
}

#[derive(Default)]
struct EngineState {
    /// Queued units in queue order, not yet dispatched.
    pending: Vec<UnitId>,
    jobs: FxHashMap<UnitId, TrackedJob>,
    /// Dispatched batches that have not been announced as done.
    batches: FxHashMap<u64, Batch>,
    next_batch: u64,
    cancelled: bool,
    /// Spawned processes per entry point.
    launched: FxHashMap<String, usize>,
}

struct EngineInner {
    provider: Arc<dyn CommandProvider>,
    messenger: Arc<dyn Messenger>,
    decoder: Arc<dyn ResultDecoder>,
    progress: Option<Arc<dyn ProgressReporter>>,
    dispatcher: Dispatcher,
    state: Mutex<EngineState>,
    /// Signalled whenever a job or batch settles.
    settled: Condvar,
    listeners: Mutex<Vec<(ListenerId, Weak<dyn EngineListener>)>>,
    next_listener: Mutex<u64>,
}

/// Runs work units in child processes.
///
/// Cloning the engine yields another handle to the same queue.
///
/// Every dispatched job finishes exactly once: it either delivers one
/// outcome (a result or a failure) to its owner and listeners, or it is
/// killed or cancelled and delivers nothing.
#[derive(Clone)]
pub struct SnippetEngine {
    inner: Arc<EngineInner>,
}

/// Builder for [`SnippetEngine`].
pub struct EngineBuilder {
    provider: Arc<dyn CommandProvider>,
    messenger: Arc<dyn Messenger>,
    decoder: Arc<dyn ResultDecoder>,
    progress: Option<Arc<dyn ProgressReporter>>,
    scheduling: Scheduling,
    max_parallel_jobs: usize,
}

impl EngineBuilder {
    pub fn messenger(mut self, messenger: Arc<dyn Messenger>) -> Self {
        self.messenger = messenger;
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn ResultDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn scheduling(mut self, scheduling: Scheduling, max_parallel_jobs: usize) -> Self {
        self.scheduling = scheduling;
        self.max_parallel_jobs = max_parallel_jobs;
        self
    }

    pub fn build(self) -> Result<SnippetEngine> {
        let dispatcher = Dispatcher::new(self.scheduling, self.max_parallel_jobs)?;
        Ok(SnippetEngine {
            inner: Arc::new(EngineInner {
                provider: self.provider,
                messenger: self.messenger,
                decoder: self.decoder,
                progress: self.progress,
                dispatcher,
                state: Mutex::new(EngineState::default()),
                settled: Condvar::new(),
                listeners: Mutex::new(Vec::new()),
                next_listener: Mutex::new(0),
            }),
        })
    }
}

impl SnippetEngine {
    /// Start building an engine around a command provider.
    pub fn builder(provider: Arc<dyn CommandProvider>) -> EngineBuilder {
        EngineBuilder {
            provider,
            messenger: Arc::new(TracingMessenger),
            decoder: Arc::new(JsonDecoder),
            progress: None,
            scheduling: Scheduling::default(),
            max_parallel_jobs: 4,
        }
    }

    /// Create an engine from a configuration, with default collaborators.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let scheduling = config.scheduling;
        let max = config.max_parallel_jobs;
        Self::builder(Arc::new(config))
            .scheduling(scheduling, max)
            .build()
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn messenger(&self) -> &Arc<dyn Messenger> {
        &self.inner.messenger
    }

    /// Register a listener. The engine holds it weakly: dropping the last
    /// strong reference detaches it.
    pub fn subscribe(&self, listener: &Arc<dyn EngineListener>) -> ListenerId {
        let id = {
            let mut next = self
                .inner
                .next_listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            ListenerId(*next)
        };
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::downgrade(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    /// Live listeners, pruning the dropped ones.
    fn listeners(&self) -> Vec<Arc<dyn EngineListener>> {
        let mut guard = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.retain(|(_, weak)| weak.strong_count() > 0);
        guard.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
    }

    /// Queue a work unit on behalf of `owner`.
    ///
    /// The job and its command line are created now; the process starts on
    /// the next [`run`](Self::run).
    pub fn queue(&self, unit: WorkUnit, owner: Weak<dyn JobOwner>) -> Arc<WorkUnit> {
        let unit = Arc::new(unit);
        let job = Arc::new(ExecutionJob::new(
            unit.clone(),
            self.inner.provider.as_ref(),
            owner,
        ));

        match job.launch_error() {
            Some(reason) => tracing::warn!("Queued {} without a command line: {}", unit, reason),
            None => tracing::debug!("Queued {} as {}", unit, unit.id()),
        }

        let mut state = self.lock_state();
        state.pending.push(unit.id());
        state.jobs.insert(unit.id(), TrackedJob { job, batch: None });
        unit
    }

    /// Start every queued job as one batch.
    ///
    /// With `background` the jobs run under the configured scheduling
    /// strategy and this returns immediately. Without it the batch runs on
    /// the calling thread and this returns once it has finished.
    pub fn run(&self, label: &str, background: bool) {
        let (batch_id, jobs) = {
            let mut state = self.lock_state();
            state.cancelled = false;

            // Jobs killed or cancelled while still queued are retired here.
            state
                .jobs
                .retain(|_, tracked| tracked.batch.is_some() || !tracked.job.is_done());

            let ids: Vec<UnitId> = state.pending.drain(..).collect();
            let batch_id = state.next_batch;
            state.next_batch += 1;

            let mut jobs = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(tracked) = state.jobs.get_mut(&id) {
                    tracked.batch = Some(batch_id);
                    jobs.push(tracked.job.clone());
                }
            }

            state.batches.insert(
                batch_id,
                Batch {
                    label: label.to_string(),
                    total: jobs.len(),
                    finished: 0,
                },
            );
            (batch_id, jobs)
        };

        tracing::debug!("{}: starting {} job(s)", label, jobs.len());
        if let Some(ref progress) = self.inner.progress {
            progress.on_batch_started(label, jobs.len(), background);
        }

        if jobs.is_empty() {
            self.announce_batch(batch_id);
            return;
        }

        let tasks: Vec<Task> = jobs
            .into_iter()
            .map(|job| {
                let engine = self.clone();
                Box::new(move || engine.execute(job)) as Task
            })
            .collect();

        if background {
            self.inner.dispatcher.dispatch(tasks);
        } else {
            Dispatcher::Blocking.dispatch(tasks);
        }
    }

    /// Run one job on the current thread and settle it.
    fn execute(&self, job: Arc<ExecutionJob>) {
        let outcome = job.run_with(
            self.inner.messenger.as_ref(),
            self.inner.decoder.as_ref(),
            |unit| {
                *self
                    .lock_state()
                    .launched
                    .entry(unit.entry_point().to_string())
                    .or_default() += 1;
            },
        );
        match outcome {
            Some(outcome) => self.notify_result(&job, outcome),
            None => tracing::debug!("{} ended without a result ({:?})", job.unit().id(), job.state()),
        }
        self.finish_job(&job);
    }

    /// Deliver one outcome: first to the owner, then to every listener.
    fn notify_result(&self, job: &Arc<ExecutionJob>, outcome: Result<SnippetResult>) {
        if let Err(ref e) = outcome {
            self.inner
                .messenger
                .log_exception(&format!("snippet {}", job.unit()), e);
        }

        if let Some(owner) = job.owner() {
            guarded("job owner", || match &outcome {
                Ok(result) => owner.accept_result(job, result),
                Err(e) => owner.accept_failure(job, e),
            });
        }
        job.complete();

        for listener in self.listeners() {
            guarded("engine listener", || listener.on_result(job.unit(), &outcome));
        }
    }

    /// Remove a dispatched job and update its batch.
    fn finish_job(&self, job: &Arc<ExecutionJob>) {
        let progress = {
            let mut state = self.lock_state();
            let batch_id = state
                .jobs
                .remove(&job.unit().id())
                .and_then(|tracked| tracked.batch);

            batch_id.and_then(|id| {
                state.batches.get_mut(&id).map(|batch| {
                    batch.finished += 1;
                    (id, batch.finished, batch.total)
                })
            })
        };

        if let Some((batch_id, finished, total)) = progress {
            if let Some(ref reporter) = self.inner.progress {
                reporter.on_job_finished(job.unit(), finished, total);
            }
            if finished == total {
                self.announce_batch(batch_id);
            }
        }

        self.inner.settled.notify_all();
    }

    /// Fire the batch's single "all done" notification, then retire it.
    fn announce_batch(&self, batch_id: u64) {
        let label = self
            .lock_state()
            .batches
            .get(&batch_id)
            .map(|batch| batch.label.clone())
            .unwrap_or_default();

        if let Some(ref reporter) = self.inner.progress {
            reporter.on_batch_finished(&label);
        }
        for listener in self.listeners() {
            guarded("engine listener", || listener.on_all_done(&label));
        }

        self.lock_state().batches.remove(&batch_id);
        self.inner.settled.notify_all();
    }

    /// Kill one job. Returns `false` if it is unknown or already finished.
    pub fn kill(&self, unit: &WorkUnit) -> bool {
        let job = {
            let mut state = self.lock_state();
            let Some(tracked) = state.jobs.get(&unit.id()) else {
                return false;
            };
            let job = tracked.job.clone();
            if tracked.batch.is_none() {
                state.pending.retain(|id| *id != unit.id());
            }
            job
        };

        let killed = job.kill();
        if killed {
            tracing::debug!("Killed {}", unit);
        }
        self.inner.settled.notify_all();
        killed
    }

    /// Kill every queued and running job. Returns how many were killed.
    pub fn kill_all(&self) -> usize {
        let jobs = {
            let mut state = self.lock_state();
            state.pending.clear();
            state
                .jobs
                .values()
                .map(|tracked| tracked.job.clone())
                .collect::<Vec<_>>()
        };

        let killed = jobs.iter().filter(|job| job.kill()).count();
        self.inner.settled.notify_all();
        killed
    }

    /// Cancel all outstanding work.
    ///
    /// Queued and running jobs become `Cancelled`, listeners are told once,
    /// and [`is_cancelled`](Self::is_cancelled) holds until the next run.
    pub fn cancel(&self) {
        let jobs = {
            let mut state = self.lock_state();
            state.cancelled = true;
            state.pending.clear();
            state
                .jobs
                .values()
                .map(|tracked| tracked.job.clone())
                .collect::<Vec<_>>()
        };

        let cancelled = jobs.iter().filter(|job| job.cancel()).count();
        tracing::debug!("Cancelled {} job(s)", cancelled);

        for listener in self.listeners() {
            guarded("engine listener", || listener.on_cancelled());
        }
        self.inner.settled.notify_all();
    }

    /// Block until every dispatched batch has finished and been announced.
    pub fn wait_for(&self) {
        let mut state = self.lock_state();
        while !state.batches.is_empty() {
            state = self
                .inner
                .settled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until one job reaches a terminal state. Returns immediately
    /// for units the engine no longer tracks.
    pub fn wait_for_unit(&self, unit: &WorkUnit) -> Option<JobState> {
        let job = self.job(unit)?;
        Some(job.wait())
    }

    /// True when every tracked job is `Done`, `Killed` or `Cancelled`.
    pub fn is_done(&self) -> bool {
        self.lock_state()
            .jobs
            .values()
            .all(|tracked| tracked.job.is_done())
    }

    pub fn is_unit_done(&self, unit: &WorkUnit) -> bool {
        self.lock_state()
            .jobs
            .get(&unit.id())
            .is_none_or(|tracked| tracked.job.is_done())
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock_state().cancelled
    }

    /// The job for a unit, while the engine tracks it.
    pub fn job(&self, unit: &WorkUnit) -> Option<Arc<ExecutionJob>> {
        self.lock_state()
            .jobs
            .get(&unit.id())
            .map(|tracked| tracked.job.clone())
    }

    pub fn job_state(&self, unit: &WorkUnit) -> Option<JobState> {
        self.job(unit).map(|job| job.state())
    }

    /// Number of queued, not yet dispatched units.
    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// How many processes were spawned for an entry point since creation.
    pub fn launched(&self, entry_point: &str) -> usize {
        self.lock_state()
            .launched
            .get(entry_point)
            .copied()
            .unwrap_or(0)
    }

    /// Kill everything that is still running.
    pub fn shutdown(&self) {
        let killed = self.kill_all();
        if killed > 0 {
            tracing::debug!("Shutdown killed {} job(s)", killed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::ResultKind;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> SnippetEngine {
        let config = EngineConfig {
            interpreter: Some(PathBuf::from("/nonexistent/bindscope/java")),
            support_classpath: Some("support.jar".to_string()),
            ..EngineConfig::default()
        };
        SnippetEngine::from_config(config).unwrap()
    }

    #[derive(Default)]
    struct Owner {
        results: AtomicUsize,
        failures: AtomicUsize,
    }

    impl JobOwner for Owner {
        fn accept_result(&self, job: &ExecutionJob, _: &SnippetResult) {
            self.results.fetch_add(1, Ordering::SeqCst);
            job.complete();
        }

        fn accept_failure(&self, job: &ExecutionJob, error: &Error) {
            assert!(error.is_job_failure());
            self.failures.fetch_add(1, Ordering::SeqCst);
            job.complete();
        }
    }

    #[derive(Default)]
    struct Counter {
        results: AtomicUsize,
        all_done: AtomicUsize,
        cancelled: AtomicUsize,
    }

    impl EngineListener for Counter {
        fn on_result(&self, _: &WorkUnit, _: &Result<SnippetResult>) {
            self.results.fetch_add(1, Ordering::SeqCst);
        }

        fn on_all_done(&self, _: &str) {
            self.all_done.fetch_add(1, Ordering::SeqCst);
        }

        fn on_cancelled(&self) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn unit() -> WorkUnit {
        WorkUnit::new("snippets.Module", ["M"], ResultKind::Constructors)
    }

    #[test]
    fn test_queue_tracks_pending_job() {
        let engine = engine();
        let owner = Arc::new(Owner::default());
        let weak: Weak<dyn JobOwner> = Arc::downgrade(&owner) as Weak<dyn JobOwner>;

        let unit = engine.queue(unit(), weak);
        assert_eq!(engine.pending_count(), 1);
        assert_eq!(engine.job_state(&unit), Some(JobState::Pending));
        assert!(!engine.is_done());
        assert!(!engine.is_unit_done(&unit));
    }

    #[test]
    fn test_launch_failure_reaches_owner() {
        let engine = engine();
        let owner = Arc::new(Owner::default());
        let counter = Arc::new(Counter::default());
        let listener: Arc<dyn EngineListener> = counter.clone();
        engine.subscribe(&listener);

        let weak: Weak<dyn JobOwner> = Arc::downgrade(&owner) as Weak<dyn JobOwner>;
        let unit = engine.queue(unit(), weak);
        engine.run("test", false);

        assert_eq!(owner.failures.load(Ordering::SeqCst), 1);
        assert_eq!(owner.results.load(Ordering::SeqCst), 0);
        assert_eq!(counter.results.load(Ordering::SeqCst), 1);
        assert_eq!(counter.all_done.load(Ordering::SeqCst), 1);
        assert!(engine.is_done());
        assert!(engine.is_unit_done(&unit));
        assert_eq!(engine.launched("snippets.Module"), 0);
    }

    #[test]
    fn test_empty_run_still_announces_done() {
        let engine = engine();
        let counter = Arc::new(Counter::default());
        let listener: Arc<dyn EngineListener> = counter.clone();
        engine.subscribe(&listener);

        engine.run("empty", true);
        engine.wait_for();
        assert_eq!(counter.all_done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_killed_pending_job_never_delivers() {
        let engine = engine();
        let owner = Arc::new(Owner::default());
        let weak: Weak<dyn JobOwner> = Arc::downgrade(&owner) as Weak<dyn JobOwner>;

        let unit = engine.queue(unit(), weak);
        let job = engine.job(&unit).unwrap();
        assert!(engine.kill(&unit));
        assert_eq!(engine.job_state(&unit), Some(JobState::Killed));
        assert!(!engine.kill(&unit));

        engine.run("after kill", false);
        engine.wait_for();
        assert_eq!(job.state(), JobState::Killed);
        assert_eq!(owner.failures.load(Ordering::SeqCst), 0);
        assert_eq!(owner.results.load(Ordering::SeqCst), 0);
        assert_eq!(engine.launched("snippets.Module"), 0);
    }

    #[test]
    fn test_cancel_marks_engine_cancelled() {
        let engine = engine();
        let owner = Arc::new(Owner::default());
        let counter = Arc::new(Counter::default());
        let listener: Arc<dyn EngineListener> = counter.clone();
        engine.subscribe(&listener);

        let weak: Weak<dyn JobOwner> = Arc::downgrade(&owner) as Weak<dyn JobOwner>;
        let unit = engine.queue(unit(), weak);
        engine.cancel();

        assert!(engine.is_cancelled());
        assert_eq!(engine.job_state(&unit), Some(JobState::Cancelled));
        assert_eq!(counter.cancelled.load(Ordering::SeqCst), 1);
        assert!(engine.is_done());

        engine.run("next", false);
        assert!(!engine.is_cancelled());
        assert!(engine.job(&unit).is_none());
    }

    #[test]
    fn test_dropped_listener_detaches() {
        let engine = engine();
        let counter = Arc::new(Counter::default());
        {
            let listener: Arc<dyn EngineListener> = counter.clone();
            engine.subscribe(&listener);
        }
        assert_eq!(engine.listeners().len(), 1);
        drop(counter);
        assert!(engine.listeners().is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let engine = engine();
        let listener: Arc<dyn EngineListener> = Arc::new(Counter::default());
        let id = engine.subscribe(&listener);
        engine.unsubscribe(id);
        assert!(engine.listeners().is_empty());
    }

    #[test]
    fn test_dropped_owner_still_completes_job() {
        let engine = engine();
        let unit = {
            let owner = Arc::new(Owner::default());
            let weak: Weak<dyn JobOwner> = Arc::downgrade(&owner) as Weak<dyn JobOwner>;
            engine.queue(unit(), weak)
        };
        let job = engine.job(&unit).unwrap();

        engine.run("orphan", false);
        assert_eq!(job.state(), JobState::Done);
        assert!(engine.is_done());
    }
}

//! Callback traits through which the engine reports to the outside world.
//!
//! - [`JobOwner`] - the node that created a work unit; receives its result or failure
//! - [`EngineListener`] - observers of every result and of batch completion
//! - [`ProgressReporter`] - progress of a running batch
//! - [`Messenger`] - user messages, snippet diagnostics and logged failures

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::error::{Error, Result};
use crate::protocol::SnippetResult;

use super::job::ExecutionJob;
use super::unit::WorkUnit;

/// Owner of a work unit.
///
/// Exactly one of the two methods is called per job that finishes without
/// being killed or cancelled. Owners call [`ExecutionJob::complete`] once
/// they have applied the outcome.
pub trait JobOwner: Send + Sync {
    /// A well-formed result of an accepted kind arrived.
    fn accept_result(&self, job: &ExecutionJob, result: &SnippetResult);

    /// The job failed to launch, to read, or to produce a usable result.
    fn accept_failure(&self, job: &ExecutionJob, error: &Error);
}

/// Observer of engine-wide events.
pub trait EngineListener: Send + Sync {
    /// Called once per finished job, in completion order.
    fn on_result(&self, unit: &WorkUnit, outcome: &Result<SnippetResult>);

    /// Called once per batch, after its last job finished.
    fn on_all_done(&self, _label: &str) {}

    /// Called when outstanding work is cancelled.
    fn on_cancelled(&self) {}
}

/// Callback trait for batch progress reporting.
pub trait ProgressReporter: Send + Sync {
    /// Called when a batch is started.
    fn on_batch_started(&self, label: &str, total: usize, background: bool);

    /// Called after each job of the batch finished.
    fn on_job_finished(&self, unit: &WorkUnit, finished: usize, total: usize);

    /// Called when the whole batch finished.
    fn on_batch_finished(&self, _label: &str) {}
}

/// Logging collaborator.
pub trait Messenger: Send + Sync {
    /// A message meant for the user.
    fn display(&self, message: &str);

    /// A diagnostic line, e.g. one line of snippet stderr.
    fn log_message(&self, message: &str);

    /// A failure caught at a job boundary.
    fn log_exception(&self, context: &str, error: &Error);
}

/// Messenger that routes everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMessenger;

impl Messenger for TracingMessenger {
    fn display(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn log_message(&self, message: &str) {
        tracing::debug!(target: "bindscope::snippet", "{}", message);
    }

    fn log_exception(&self, context: &str, error: &Error) {
        tracing::error!("{}: {}", context, error);
    }
}

/// Run a callback, containing any panic so that sibling jobs and batch
/// accounting keep going.
pub(crate) fn guarded(what: &str, callback: impl FnOnce()) {
    if let Err(e) = catch_unwind(AssertUnwindSafe(callback)) {
        let message = e
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| e.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!("{} panicked: {}", what, message);
    }
}

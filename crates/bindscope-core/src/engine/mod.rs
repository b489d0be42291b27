//! Snippet execution engine.
//!
//! Runs work units in isolated child processes and routes each result back
//! to the node that created the unit.
//!
//! # Architecture
//!
//! ```text
//! SnippetEngine
//!     │
//!     ├── queue(WorkUnit, owner) ──▶ ExecutionJob (Pending, command line built)
//!     │
//!     ├── run(label, background)
//!     │       └── Dispatcher (thread per job / pool / sequential / blocking)
//!     │               └── ExecutionJob::run
//!     │                       ├── spawn [interpreter, -classpath, cp, entry, args...]
//!     │                       ├── stderr lines ──▶ Messenger::log_message
//!     │                       └── stdout ──▶ ResultDecoder ──▶ SnippetResult
//!     │
//!     ├── owner.accept_result / accept_failure ──▶ job.complete()
//!     ├── EngineListener::on_result (completion order)
//!     └── EngineListener::on_all_done (once per batch)
//! ```
//!
//! # Module Structure
//!
//! - `callbacks` - Owner, listener, progress and messenger traits
//! - `job` - ExecutionJob and its state machine
//! - `schedule` - Scheduling strategies for a batch
//! - `snippet` - SnippetEngine
//! - `unit` - WorkUnit

mod callbacks;
mod job;
mod schedule;
mod snippet;
mod unit;

pub use callbacks::{EngineListener, JobOwner, Messenger, ProgressReporter, TracingMessenger};
pub use job::{CLASSPATH_FLAG, ExecutionJob, JobState, build_command_line};
pub use snippet::{EngineBuilder, ListenerId, SnippetEngine};
pub use unit::{UnitId, WorkUnit};

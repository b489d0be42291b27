//! Core engine for bindscope.
//!
//! This crate provides:
//! - A snippet engine that runs isolated work units in child processes
//! - Memoized, dirty-flagged representations of modules and module contexts
//! - A module manager that propagates invalidation and batches recomputation
//! - The result protocol spoken by snippet processes

pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod model;
pub mod protocol;

pub use config::{CommandProvider, EngineConfig, Scheduling, read_json_file};
pub use engine::{
    EngineBuilder, EngineListener, ExecutionJob, JobOwner, JobState, ListenerId, Messenger,
    ProgressReporter, SnippetEngine, TracingMessenger, UnitId, WorkUnit,
};
pub use error::{Error, Result};
pub use manager::{ModuleManager, Resolution};
pub use model::{
    BindingInfo, BindingKey, CollectingProblemSink, ConstructorSignature, Module, ModuleContext,
    ModuleInstance, Problem, ProblemKind, ProblemSink, Representation, SourceLocation,
    TracingProblemSink,
};
pub use protocol::{JsonDecoder, ResultDecoder, ResultKind, SnippetResult};

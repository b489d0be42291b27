//! Memoized representations of the inspected project.
//!
//! This module provides:
//! - [`Module`] - a module class and its constructor signatures
//! - [`ModuleContext`] - a set of module instances and the binding table of
//!   the injector built from them
//! - Binding keys with prefix and annotation normalization
//! - Problems and problem sinks
//!
//! Both node types start dirty and are cleaned by queueing a work unit on a
//! [`crate::SnippetEngine`]; the engine calls back with the result.

mod binding;
mod context;
mod memo;
mod module;
mod problem;

pub use binding::{BindingInfo, BindingKey, SourceLocation};
pub use context::{CONTEXT_SNIPPET, ModuleContext};
pub use module::{ConstructorSignature, MODULE_SNIPPET, Module, ModuleInstance};
pub use problem::{CollectingProblemSink, Problem, ProblemKind, ProblemSink, TracingProblemSink};

use crate::engine::JobOwner;

/// A memoized, dirty-flagged node.
pub trait Representation: JobOwner {
    /// Stable identity of the node.
    fn name(&self) -> &str;

    /// Whether the memoized state is stale or was never computed.
    fn is_dirty(&self) -> bool;

    /// Mark the memoized state stale. Idempotent.
    fn mark_dirty(&self);
}

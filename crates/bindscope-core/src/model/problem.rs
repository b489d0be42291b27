//! Problems reported by snippets and the sinks that receive them.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::protocol::ResultKind;

/// Category of a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    /// A module or the injector could not be created.
    Creation,
    /// A module's `configure` failed.
    Configuration,
    /// A binding is invalid.
    Binding,
    /// A dependency has no binding.
    NoBinding,
    /// Providing an instance failed.
    Provision,
    /// The snippet answered with the wrong kind of result.
    UnexpectedResult,
}

impl ProblemKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProblemKind::Creation => "creation",
            ProblemKind::Configuration => "configuration",
            ProblemKind::Binding => "binding",
            ProblemKind::NoBinding => "no binding",
            ProblemKind::Provision => "provision",
            ProblemKind::UnexpectedResult => "unexpected result",
        }
    }
}

/// A domain-level failure reported by a snippet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Problem {
    pub kind: ProblemKind,
    /// Class or key the problem is about.
    #[serde(default)]
    pub subject: String,
    /// Name of the module context the problem surfaced in.
    #[serde(default)]
    pub module_context: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl Problem {
    pub fn new(kind: ProblemKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            module_context: String::new(),
            message: message.into(),
            stack_trace: None,
        }
    }

    pub fn with_context(mut self, module_context: impl Into<String>) -> Self {
        self.module_context = module_context.into();
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// The snippet for `subject` answered with the wrong kind of result.
    pub fn unexpected_result(subject: &str, expected: ResultKind, found: ResultKind) -> Self {
        Self::new(
            ProblemKind::UnexpectedResult,
            subject,
            format!("expected a {} result, got {}", expected, found),
        )
        .with_context(subject)
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.kind.label())?;
        if !self.subject.is_empty() {
            write!(f, "{}: ", self.subject)?;
        }
        f.write_str(&self.message)?;
        if !self.module_context.is_empty() {
            write!(f, " (in {})", self.module_context)?;
        }
        Ok(())
    }
}

/// Tag problems with the node they surfaced in and drop duplicates.
pub(crate) fn collect_problems(problems: &[Problem], module_context: &str) -> Vec<Problem> {
    let mut collected: Vec<Problem> = Vec::with_capacity(problems.len());
    for problem in problems {
        let mut problem = problem.clone();
        if problem.module_context.is_empty() {
            problem.module_context = module_context.to_string();
        }
        if !collected.contains(&problem) {
            collected.push(problem);
        }
    }
    collected
}

/// Problems applied to a node and the sink they go to.
pub(crate) type Report = (Vec<Problem>, Option<Arc<dyn ProblemSink>>);

/// Hand a non-empty problem set to a sink, if there is one.
pub(crate) fn report_problems(sink: Option<&Arc<dyn ProblemSink>>, origin: &str, problems: &[Problem]) {
    match sink {
        Some(sink) if !problems.is_empty() => sink.report(origin, problems),
        _ => {}
    }
}

/// Receives every non-empty problem set surfaced during recomputation.
pub trait ProblemSink: Send + Sync {
    /// `origin` is the name of the module or module context.
    fn report(&self, origin: &str, problems: &[Problem]);
}

/// Problem sink that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProblemSink;

impl ProblemSink for TracingProblemSink {
    fn report(&self, origin: &str, problems: &[Problem]) {
        for problem in problems {
            tracing::warn!("{}: {}", origin, problem);
        }
    }
}

/// Problem sink that keeps everything it receives.
#[derive(Debug, Default)]
pub struct CollectingProblemSink {
    problems: Mutex<Vec<(String, Problem)>>,
}

impl CollectingProblemSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All problems received so far with their origin.
    pub fn problems(&self) -> Vec<(String, Problem)> {
        self.problems
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.problems
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.problems
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ProblemSink for CollectingProblemSink {
    fn report(&self, origin: &str, problems: &[Problem]) {
        let mut guard = self.problems.lock().unwrap_or_else(PoisonError::into_inner);
        guard.extend(problems.iter().map(|p| (origin.to_string(), p.clone())));
    }
}

//! Modules: a module class and its introspected constructors.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};

use crate::engine::{ExecutionJob, JobOwner, SnippetEngine, WorkUnit};
use crate::error::Error;
use crate::protocol::{ResultKind, SnippetResult};

use super::Representation;
use super::memo::Memo;
use super::problem::{Problem, ProblemSink, Report, collect_problems, report_problems};

/// Entry point that introspects the constructors of one module class.
pub const MODULE_SNIPPET: &str = "bindscope.snippets.ModuleSnippet";

/// Parameter types of one constructor, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstructorSignature {
    pub parameters: Vec<String>,
}

impl ConstructorSignature {
    pub fn new<I, S>(parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parameters: parameters.into_iter().map(Into::into).collect(),
        }
    }

    /// The no-argument constructor.
    pub fn is_default(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl fmt::Display for ConstructorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.parameters.join(", "))
    }
}

/// A module class plus the constructor argument values to build it with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleInstance {
    pub module: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl ModuleInstance {
    /// Instance built with the default constructor.
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// Encoding used as one positional argument of a context snippet.
    pub fn to_argument(&self) -> String {
        serde_json::json!({
            "module": self.module,
            "arguments": self.arguments,
        })
        .to_string()
    }
}

impl fmt::Display for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.module, self.arguments.join(", "))
    }
}

struct ModuleState {
    memo: Memo,
    constructors: BTreeSet<ConstructorSignature>,
    has_default_constructor: bool,
    problems: Vec<Problem>,
    sink: Option<Arc<dyn ProblemSink>>,
}

/// A module class known to the manager.
///
/// Cleaning a module asks the snippet engine for the constructors of the
/// class. Modules do not compute bindings; contexts do.
pub struct Module {
    name: String,
    state: Mutex<ModuleState>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ModuleState {
                memo: Memo::default(),
                constructors: BTreeSet::new(),
                has_default_constructor: false,
                problems: Vec::new(),
                sink: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModuleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attach_sink(&self, sink: Arc<dyn ProblemSink>) {
        self.lock().sink = Some(sink);
    }

    /// Queue the introspection of this module on `engine`.
    ///
    /// Returns the unit of the job already in flight if it is still current;
    /// a job queued before the last invalidation is killed and replaced.
    pub fn clean(self: &Arc<Self>, engine: &SnippetEngine) -> Arc<WorkUnit> {
        let mut state = self.lock();
        if let Some(unit) = state.memo.outstanding(engine) {
            tracing::debug!("Module {} already has {} in flight", self.name, unit.id());
            return unit;
        }
        if let Some(stale) = state.memo.superseded(engine) {
            tracing::debug!("Module {} changed, killing {}", self.name, stale.id());
            engine.kill(&stale);
        }

        let owner: Weak<dyn JobOwner> = Arc::downgrade(self) as Weak<dyn JobOwner>;
        let unit = engine.queue(
            WorkUnit::new(MODULE_SNIPPET, [self.name.as_str()], ResultKind::Constructors),
            owner,
        );
        state.memo.begin(unit.clone());
        unit
    }

    pub fn constructors(&self) -> Vec<ConstructorSignature> {
        self.lock().constructors.iter().cloned().collect()
    }

    pub fn has_default_constructor(&self) -> bool {
        self.lock().has_default_constructor
    }

    pub fn problems(&self) -> Vec<Problem> {
        self.lock().problems.clone()
    }

    /// Error of the last failed job, cleared by the next applied result.
    pub fn last_error(&self) -> Option<String> {
        self.lock().memo.last_error().map(str::to_string)
    }

    /// Instance built with the default constructor.
    pub fn default_instance(&self) -> ModuleInstance {
        ModuleInstance::new(self.name.clone())
    }

    /// Apply a result under the node lock. Returns the problems to report,
    /// or `None` if the result belongs to a superseded job.
    fn apply(&self, job: &ExecutionJob, result: &SnippetResult) -> Option<Report> {
        let id = job.unit().id();
        let mut state = self.lock();
        match result {
            SnippetResult::Constructors {
                constructors,
                has_default_constructor,
            } => {
                if !state.memo.settle(id) {
                    return None;
                }
                state.constructors = constructors.iter().cloned().collect();
                state.has_default_constructor = *has_default_constructor
                    || constructors.iter().any(ConstructorSignature::is_default);
                state.problems.clear();
            }
            SnippetResult::Problems { problems } => {
                if !state.memo.settle(id) {
                    return None;
                }
                state.constructors.clear();
                state.has_default_constructor = false;
                state.problems = collect_problems(problems, &self.name);
            }
            other => {
                let problem = Problem::unexpected_result(&self.name, ResultKind::Constructors, other.kind());
                if !state.memo.fail(id, problem.message.clone()) {
                    return None;
                }
                state.problems = vec![problem];
            }
        }
        Some((state.problems.clone(), state.sink.clone()))
    }
}

impl JobOwner for Module {
    fn accept_result(&self, job: &ExecutionJob, result: &SnippetResult) {
        let applied = self.apply(job, result);
        job.complete();

        match applied {
            Some((problems, sink)) => {
                tracing::debug!(
                    "Module {} updated with {} problem(s)",
                    self.name,
                    problems.len()
                );
                report_problems(sink.as_ref(), &self.name, &problems);
            }
            None => tracing::debug!("Module {} ignored stale {}", self.name, job.unit().id()),
        }
    }

    fn accept_failure(&self, job: &ExecutionJob, error: &Error) {
        let reported = {
            let mut state = self.lock();
            if !state.memo.fail(job.unit().id(), error.to_string()) {
                None
            } else if let Error::UnexpectedResultKind { expected, found } = error {
                state.problems = vec![Problem::unexpected_result(&self.name, *expected, *found)];
                Some((state.problems.clone(), state.sink.clone()))
            } else {
                Some((Vec::new(), None))
            }
        };
        job.complete();

        if let Some((problems, sink)) = reported {
            tracing::warn!("Module {} stays dirty: {}", self.name, error);
            report_problems(sink.as_ref(), &self.name, &problems);
        }
    }
}

impl Representation for Module {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dirty(&self) -> bool {
        self.lock().memo.is_dirty()
    }

    fn mark_dirty(&self) {
        self.lock().memo.mark_dirty();
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

//! Module contexts: the injector built from a set of module instances.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rustc_hash::FxHashMap;

use crate::engine::{ExecutionJob, JobOwner, SnippetEngine, WorkUnit};
use crate::error::Error;
use crate::protocol::{ResultKind, SnippetResult};

use super::Representation;
use super::binding::{BindingInfo, BindingKey, strip_type_prefix};
use super::memo::Memo;
use super::module::ModuleInstance;
use super::problem::{Problem, ProblemSink, Report, collect_problems, report_problems};

/// Entry point that builds an injector and reports its binding table.
pub const CONTEXT_SNIPPET: &str = "bindscope.snippets.ContextSnippet";

struct ContextState {
    memo: Memo,
    members: Vec<ModuleInstance>,
    bindings: FxHashMap<BindingKey, BindingInfo>,
    problems: Vec<Problem>,
    sink: Option<Arc<dyn ProblemSink>>,
}

/// A named set of module instances and the bindings of the injector built
/// from them.
///
/// Members may name module classes the manager does not know about.
/// Lookups only read the memoized table; recomputation is driven by the
/// [`crate::ModuleManager`].
pub struct ModuleContext {
    name: String,
    state: Mutex<ContextState>,
}

impl ModuleContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ContextState {
                memo: Memo::default(),
                members: Vec::new(),
                bindings: FxHashMap::default(),
                problems: Vec::new(),
                sink: None,
            }),
        }
    }

    pub fn with_member(self, member: ModuleInstance) -> Self {
        self.add_member(member);
        self
    }

    pub fn with_members(self, members: impl IntoIterator<Item = ModuleInstance>) -> Self {
        for member in members {
            self.add_member(member);
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attach_sink(&self, sink: Arc<dyn ProblemSink>) {
        self.lock().sink = Some(sink);
    }

    /// Add a member and mark the context dirty. Returns `false` if the
    /// instance is already a member.
    pub(crate) fn add_member(&self, member: ModuleInstance) -> bool {
        let mut state = self.lock();
        if state.members.contains(&member) {
            return false;
        }
        state.members.push(member);
        state.memo.mark_dirty();
        true
    }

    /// Remove every instance of `module`. Returns `false` if none was a member.
    pub(crate) fn remove_member(&self, module: &str) -> bool {
        let mut state = self.lock();
        let before = state.members.len();
        state.members.retain(|member| member.module != module);
        if state.members.len() == before {
            return false;
        }
        state.memo.mark_dirty();
        true
    }

    pub fn members(&self) -> Vec<ModuleInstance> {
        self.lock().members.clone()
    }

    /// Whether any member instantiates `module`.
    pub fn references(&self, module: &str) -> bool {
        self.lock().members.iter().any(|member| member.module == module)
    }

    /// Names of the module classes this context instantiates, deduplicated.
    pub fn referenced_modules(&self) -> Vec<String> {
        let state = self.lock();
        let mut names: Vec<String> = Vec::with_capacity(state.members.len());
        for member in &state.members {
            if !names.contains(&member.module) {
                names.push(member.module.clone());
            }
        }
        names
    }

    /// Queue the injector build for this context on `engine`.
    ///
    /// Returns the unit of the job already in flight if it is still current;
    /// a job queued before the last invalidation is killed and replaced.
    pub fn clean(self: &Arc<Self>, engine: &SnippetEngine) -> Arc<WorkUnit> {
        let mut state = self.lock();
        if let Some(unit) = state.memo.outstanding(engine) {
            tracing::debug!("Context {} already has {} in flight", self.name, unit.id());
            return unit;
        }
        if let Some(stale) = state.memo.superseded(engine) {
            tracing::debug!("Context {} changed, killing {}", self.name, stale.id());
            engine.kill(&stale);
        }

        let arguments: Vec<String> = state.members.iter().map(ModuleInstance::to_argument).collect();
        let owner: Weak<dyn JobOwner> = Arc::downgrade(self) as Weak<dyn JobOwner>;
        let unit = engine.queue(
            WorkUnit::new(CONTEXT_SNIPPET, arguments, ResultKind::Bindings),
            owner,
        );
        state.memo.begin(unit.clone());
        unit
    }

    /// Snapshot of the binding table, sorted by key.
    pub fn bindings(&self) -> Vec<BindingInfo> {
        let mut bindings: Vec<BindingInfo> = self.lock().bindings.values().cloned().collect();
        bindings.sort_by_cached_key(|info| info.key.to_string());
        bindings
    }

    pub fn binding_count(&self) -> usize {
        self.lock().bindings.len()
    }

    pub fn problems(&self) -> Vec<Problem> {
        self.lock().problems.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().memo.last_error().map(str::to_string)
    }

    /// Look up the binding for a type and optional annotation.
    ///
    /// Tries the textual variants an inspector may have reported, then any
    /// key that matches after normalization. `None` means "no binding".
    pub fn find_location(&self, bound_type: &str, annotation: Option<&str>) -> Option<BindingInfo> {
        let state = self.lock();
        let variants = BindingKey::variants(bound_type, annotation);
        if let Some(info) = variants.iter().find_map(|key| state.bindings.get(key)) {
            return Some(info.clone());
        }

        let query = BindingKey::new(bound_type, annotation);
        state
            .bindings
            .iter()
            .filter(|(key, _)| key.matches(&query))
            .min_by(|(a, _), (b, _)| a.bound_type.cmp(&b.bound_type).then(a.annotation.cmp(&b.annotation)))
            .map(|(_, info)| info.clone())
    }

    /// Every binding of a type, under any annotation.
    pub fn find_locations(&self, bound_type: &str) -> Vec<BindingInfo> {
        let wanted = strip_type_prefix(bound_type);
        let mut found: Vec<BindingInfo> = self
            .lock()
            .bindings
            .values()
            .filter(|info| info.key.normalized_type() == wanted)
            .cloned()
            .collect();
        found.sort_by_cached_key(|info| info.key.to_string());
        found
    }

    fn apply(&self, job: &ExecutionJob, result: &SnippetResult) -> Option<Report> {
        let id = job.unit().id();
        let mut state = self.lock();
        match result {
            SnippetResult::Bindings { bindings, problems } => {
                if !state.memo.settle(id) {
                    return None;
                }
                let mut table = FxHashMap::default();
                for info in bindings {
                    table.entry(info.key.clone()).or_insert_with(|| info.clone());
                }
                state.bindings = table;
                state.problems = collect_problems(problems, &self.name);
            }
            SnippetResult::Problems { problems } => {
                if !state.memo.settle(id) {
                    return None;
                }
                state.bindings.clear();
                state.problems = collect_problems(problems, &self.name);
            }
            other => {
                let problem = Problem::unexpected_result(&self.name, ResultKind::Bindings, other.kind());
                if !state.memo.fail(id, problem.message.clone()) {
                    return None;
                }
                state.problems = vec![problem];
            }
        }
        Some((state.problems.clone(), state.sink.clone()))
    }
}

impl JobOwner for ModuleContext {
    fn accept_result(&self, job: &ExecutionJob, result: &SnippetResult) {
        let applied = self.apply(job, result);
        job.complete();

        let Some((problems, sink)) = applied else {
            tracing::debug!("Context {} ignored stale {}", self.name, job.unit().id());
            return;
        };
        tracing::debug!(
            "Context {} updated: {} binding(s), {} problem(s)",
            self.name,
            self.binding_count(),
            problems.len()
        );
        report_problems(sink.as_ref(), &self.name, &problems);
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
            tracing::warn!("Context {} stays dirty: {}", self.name, error);
            report_problems(sink.as_ref(), &self.name, &problems);
        }
    }
}

impl Representation for ModuleContext {
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

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ModuleContext")
            .field("name", &self.name)
            .field("members", &state.members)
            .field("dirty", &state.memo.is_dirty())
            .field("bindings", &state.bindings.len())
            .finish()
    }
}

//! Module manager: owns the module and context graph, propagates
//! invalidation from modules to the contexts that instantiate them, and
//! batches recomputation through the snippet engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::engine::SnippetEngine;
use crate::error::{Error, Result};
use crate::model::{
    BindingInfo, Module, ModuleContext, ModuleInstance, Problem, ProblemSink, Representation,
};

/// Outcome of [`ModuleManager::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Every active context is up to date. `bindings` pairs each match with
    /// the name of the context it was found in; an empty list means the type
    /// has no binding.
    Resolved {
        bindings: Vec<(String, BindingInfo)>,
        problems: Vec<Problem>,
    },
    /// Recomputation is still running.
    Pending,
    /// Recomputation was cancelled.
    Cancelled,
}

#[derive(Default)]
struct ManagerState {
    modules: FxHashMap<String, Arc<Module>>,
    contexts: FxHashMap<String, Arc<ModuleContext>>,
    active: FxHashSet<String>,
    /// Contexts created by `add_module` for a module on its own.
    own_contexts: FxHashSet<String>,
    /// Module name to the contexts that instantiate it.
    dependents: FxHashMap<String, FxHashSet<String>>,
}

impl ManagerState {
    fn index(&mut self, context: &ModuleContext) {
        for module in context.referenced_modules() {
            self.dependents
                .entry(module)
                .or_default()
                .insert(context.name().to_string());
        }
    }

    fn unindex(&mut self, context_name: &str) {
        self.dependents.retain(|_, contexts| {
            contexts.remove(context_name);
            !contexts.is_empty()
        });
    }

    fn drop_context(&mut self, name: &str) -> Option<Arc<ModuleContext>> {
        let context = self.contexts.remove(name)?;
        self.active.remove(name);
        self.own_contexts.remove(name);
        self.unindex(name);
        Some(context)
    }

    fn context(&self, name: &str) -> Result<Arc<ModuleContext>> {
        self.contexts
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("module context '{}'", name)))
    }

    fn sorted_active(&self) -> Vec<Arc<ModuleContext>> {
        let mut names: Vec<&String> = self.active.iter().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.contexts.get(name).cloned())
            .collect()
    }

    /// Known modules instantiated by the given contexts, once each.
    fn referenced_modules(&self, contexts: &[Arc<ModuleContext>]) -> Vec<Arc<Module>> {
        let mut seen = FxHashSet::default();
        let mut modules = Vec::new();
        for context in contexts {
            for name in context.referenced_modules() {
                let Some(module) = self.modules.get(&name) else {
                    continue;
                };
                if seen.insert(name) {
                    modules.push(module.clone());
                }
            }
        }
        modules
    }
}

/// Owns modules and module contexts and decides what to recompute.
///
/// Only active contexts take part in automatic recomputation and in
/// resolution queries. A context may instantiate modules the manager has
/// never seen; those are still passed to the snippet by class name.
///
/// Dropping the manager kills whatever its engine is still running.
pub struct ModuleManager {
    engine: SnippetEngine,
    sink: Arc<dyn ProblemSink>,
    run_automatically: AtomicBool,
    state: Mutex<ManagerState>,
}

impl ModuleManager {
    pub fn new(engine: SnippetEngine, sink: Arc<dyn ProblemSink>) -> Self {
        Self {
            engine,
            sink,
            run_automatically: AtomicBool::new(false),
            state: Mutex::new(ManagerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn engine(&self) -> &SnippetEngine {
        &self.engine
    }

    /// When set, [`module_changed`](Self::module_changed) starts an update
    /// right away.
    pub fn set_run_automatically(&self, enabled: bool) {
        self.run_automatically.store(enabled, Ordering::SeqCst);
    }

    pub fn run_automatically(&self) -> bool {
        self.run_automatically.load(Ordering::SeqCst)
    }

    // ---- modules ----

    /// Register a module by class name, together with a context of the same
    /// name that contains only its default instance.
    ///
    /// Idempotent; `activate` activates the module's own context.
    pub fn add_module(&self, name: &str, activate: bool) -> Arc<Module> {
        let mut state = self.lock();
        let module = match state.modules.get(name) {
            Some(existing) => existing.clone(),
            None => {
                let module = Arc::new(Module::new(name));
                module.attach_sink(self.sink.clone());
                state.modules.insert(name.to_string(), module.clone());
                tracing::debug!("Added module {}", name);
                module
            }
        };

        if !state.contexts.contains_key(name) {
            let context = ModuleContext::new(name).with_member(module.default_instance());
            context.attach_sink(self.sink.clone());
            state.index(&context);
            state.contexts.insert(name.to_string(), Arc::new(context));
            state.own_contexts.insert(name.to_string());
        }
        if activate {
            state.active.insert(name.to_string());
        }
        module
    }

    pub fn module(&self, name: &str) -> Option<Arc<Module>> {
        self.lock().modules.get(name).cloned()
    }

    /// All modules, sorted by name.
    pub fn modules(&self) -> Vec<Arc<Module>> {
        let mut modules: Vec<Arc<Module>> = self.lock().modules.values().cloned().collect();
        modules.sort_by(|a, b| a.name().cmp(b.name()));
        modules
    }

    /// Forget a module and its own context. Contexts that instantiate the
    /// module keep it as a member.
    pub fn remove_module(&self, name: &str) -> bool {
        let mut state = self.lock();
        if state.modules.remove(name).is_none() {
            return false;
        }
        if state.own_contexts.contains(name) {
            state.drop_context(name);
        }
        tracing::debug!("Removed module {}", name);
        true
    }

    pub fn clear_modules(&self) {
        let mut state = self.lock();
        state.modules.clear();
        let own: Vec<String> = state.own_contexts.iter().cloned().collect();
        for name in own {
            state.drop_context(&name);
        }
    }

    // ---- contexts ----

    /// The context named `name`, created empty and inactive if needed.
    pub fn create_module_context(&self, name: &str) -> Arc<ModuleContext> {
        let mut state = self.lock();
        if let Some(existing) = state.contexts.get(name) {
            return existing.clone();
        }
        let context = Arc::new(ModuleContext::new(name));
        context.attach_sink(self.sink.clone());
        state.contexts.insert(name.to_string(), context.clone());
        context
    }

    /// Register a context, replacing any user context of the same name.
    pub fn add_module_context(&self, context: ModuleContext, active: bool) -> Result<Arc<ModuleContext>> {
        let name = context.name().to_string();
        let mut state = self.lock();
        if state.own_contexts.contains(&name) {
            return Err(Error::InvalidOperation(format!(
                "'{}' is the own context of a module",
                name
            )));
        }

        state.drop_context(&name);
        let context = Arc::new(context);
        context.attach_sink(self.sink.clone());
        state.index(&context);
        state.contexts.insert(name.clone(), context.clone());
        if active {
            state.active.insert(name);
        }
        Ok(context)
    }

    pub fn remove_module_context(&self, name: &str) -> bool {
        self.lock().drop_context(name).is_some()
    }

    pub fn activate_module_context(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.context(name)?;
        state.active.insert(name.to_string());
        Ok(())
    }

    pub fn deactivate_module_context(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.context(name)?;
        state.active.remove(name);
        Ok(())
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.lock().active.contains(name)
    }

    pub fn context(&self, name: &str) -> Option<Arc<ModuleContext>> {
        self.lock().contexts.get(name).cloned()
    }

    /// Active contexts, sorted by name.
    pub fn active_contexts(&self) -> Vec<Arc<ModuleContext>> {
        self.lock().sorted_active()
    }

    /// All contexts, sorted by name.
    pub fn contexts(&self) -> Vec<Arc<ModuleContext>> {
        let mut contexts: Vec<Arc<ModuleContext>> = self.lock().contexts.values().cloned().collect();
        contexts.sort_by(|a, b| a.name().cmp(b.name()));
        contexts
    }

    /// Contexts that instantiate `module`, sorted by name.
    pub fn dependents(&self, module: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .dependents
            .get(module)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Add a module instance to a context. The context becomes dirty if the
    /// instance is new.
    pub fn add_context_member(&self, context: &str, member: ModuleInstance) -> Result<bool> {
        let mut state = self.lock();
        if state.own_contexts.contains(context) {
            return Err(Error::InvalidOperation(format!(
                "the members of '{}' are fixed",
                context
            )));
        }
        let target = state.context(context)?;
        let module = member.module.clone();
        if !target.add_member(member) {
            return Ok(false);
        }
        state
            .dependents
            .entry(module)
            .or_default()
            .insert(context.to_string());
        Ok(true)
    }

    /// Remove every instance of `module` from a context.
    pub fn remove_context_member(&self, context: &str, module: &str) -> Result<bool> {
        let mut state = self.lock();
        if state.own_contexts.contains(context) {
            return Err(Error::InvalidOperation(format!(
                "the members of '{}' are fixed",
                context
            )));
        }
        let target = state.context(context)?;
        if !target.remove_member(module) {
            return Ok(false);
        }
        if let Some(contexts) = state.dependents.get_mut(module) {
            contexts.remove(context);
            if contexts.is_empty() {
                state.dependents.remove(module);
            }
        }
        Ok(true)
    }

    /// The class of `name` changed: mark the module and every context that
    /// instantiates it dirty.
    pub fn module_changed(&self, name: &str) {
        {
            let state = self.lock();
            if let Some(module) = state.modules.get(name) {
                module.mark_dirty();
            }
            let mut dirtied = 0;
            if let Some(contexts) = state.dependents.get(name) {
                for context in contexts.iter().filter_map(|c| state.contexts.get(c)) {
                    context.mark_dirty();
                    dirtied += 1;
                }
            }
            tracing::debug!("Module {} changed, {} context(s) dirty", name, dirtied);
        }

        if self.run_automatically() {
            self.update(false, true);
        }
    }

    // ---- recomputation ----

    /// Recompute every dirty active context, plus every dirty known module
    /// those contexts instantiate, in one batch.
    ///
    /// With `wait_for` this blocks until the batch has finished and returns
    /// `false` if it was cancelled; otherwise it returns `true` at once.
    pub fn update(&self, wait_for: bool, background: bool) -> bool {
        let (contexts, modules) = {
            let state = self.lock();
            let contexts: Vec<Arc<ModuleContext>> = state
                .sorted_active()
                .into_iter()
                .filter(|context| context.is_dirty())
                .collect();
            let modules: Vec<Arc<Module>> = state
                .referenced_modules(&contexts)
                .into_iter()
                .filter(|module| module.is_dirty())
                .collect();
            (contexts, modules)
        };

        tracing::debug!(
            "Updating {} context(s) and {} module(s)",
            contexts.len(),
            modules.len()
        );
        for module in &modules {
            module.clean(&self.engine);
        }
        for context in &contexts {
            context.clean(&self.engine);
        }
        self.finish("Updating module contexts", wait_for, background)
    }

    /// Introspect the dirty modules that active contexts instantiate.
    pub fn update_modules(&self, wait_for: bool, background: bool) -> bool {
        let modules: Vec<Arc<Module>> = {
            let state = self.lock();
            let active = state.sorted_active();
            state
                .referenced_modules(&active)
                .into_iter()
                .filter(|module| module.is_dirty())
                .collect()
        };

        tracing::debug!("Updating {} module(s)", modules.len());
        for module in &modules {
            module.clean(&self.engine);
        }
        self.finish("Updating modules", wait_for, background)
    }

    /// Mark every active context dirty, then [`update`](Self::update).
    pub fn rerun_modules(&self, wait_for: bool, background: bool) -> bool {
        for context in self.active_contexts() {
            context.mark_dirty();
        }
        self.update(wait_for, background)
    }

    /// Run [`update`](Self::update) on a dedicated thread, then hand the
    /// outcome to `post`.
    pub fn update_async<F>(self: &Arc<Self>, background: bool, post: F) -> JoinHandle<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let manager = Arc::clone(self);
        thread::spawn(move || {
            let success = manager.update(true, background);
            post(success);
        })
    }

    fn finish(&self, label: &str, wait_for: bool, background: bool) -> bool {
        self.engine.run(label, background);
        if !wait_for {
            return true;
        }
        self.engine.wait_for();
        !self.engine.is_cancelled()
    }

    // ---- queries ----

    /// First binding of the type among the active contexts, by context name.
    ///
    /// Reads memoized state only; call [`update`](Self::update) first.
    pub fn find_location(&self, bound_type: &str, annotation: Option<&str>) -> Option<(String, BindingInfo)> {
        self.active_contexts().into_iter().find_map(|context| {
            context
                .find_location(bound_type, annotation)
                .map(|info| (context.name().to_string(), info))
        })
    }

    /// Every binding of the type in every active context.
    pub fn find_locations(&self, bound_type: &str) -> Vec<(String, BindingInfo)> {
        self.active_contexts()
            .into_iter()
            .flat_map(|context| {
                let name = context.name().to_string();
                context
                    .find_locations(bound_type)
                    .into_iter()
                    .map(move |info| (name.clone(), info))
            })
            .collect()
    }

    /// Bring the active contexts up to date and look up a binding in each.
    pub fn resolve(&self, bound_type: &str, annotation: Option<&str>, wait_for: bool) -> Resolution {
        if !self.update(wait_for, true) {
            return Resolution::Cancelled;
        }

        let contexts = self.active_contexts();
        if !wait_for && contexts.iter().any(|context| context.is_dirty()) {
            return Resolution::Pending;
        }

        let bindings = contexts
            .iter()
            .filter_map(|context| {
                context
                    .find_location(bound_type, annotation)
                    .map(|info| (context.name().to_string(), info))
            })
            .collect();
        let problems = contexts.iter().flat_map(|context| context.problems()).collect();
        Resolution::Resolved { bindings, problems }
    }

    /// Problems of every active context.
    pub fn problems(&self) -> Vec<Problem> {
        self.active_contexts()
            .iter()
            .flat_map(|context| context.problems())
            .collect()
    }
}

impl Drop for ModuleManager {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

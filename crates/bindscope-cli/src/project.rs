//! Project configuration: engine settings plus the modules and contexts to
//! inspect.
//!
//! ```json
//! {
//!   "engine": { "support_classpath": "lib/bindscope-snippets.jar",
//!               "project_classpath": ["build/classes", "lib/guice.jar"] },
//!   "modules": [{ "name": "com.acme.AppModule", "active": false }],
//!   "contexts": [{ "name": "App",
//!                  "members": [{ "module": "com.acme.AppModule" },
//!                              { "module": "com.acme.DbModule", "arguments": ["jdbc:h2:mem"] }] }]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use bindscope_core::{
    EngineConfig, Error, ModuleContext, ModuleInstance, ModuleManager, ProgressReporter, Result,
    SnippetEngine, TracingProblemSink, read_json_file,
};

/// File name looked up in the working directory.
pub const PROJECT_FILE: &str = "bindscope.json";

fn default_true() -> bool {
    true
}

/// A module registered with the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    /// Activate the module's own context.
    #[serde(default)]
    pub active: bool,
}

/// A user-defined module context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub name: String,
    #[serde(default)]
    pub members: Vec<ModuleInstance>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub engine: EngineConfig,
    pub modules: Vec<ModuleEntry>,
    pub contexts: Vec<ContextEntry>,
}

impl ProjectConfig {
    /// Find the configuration file.
    ///
    /// Looks in the following order:
    /// 1. The `--config` argument
    /// 2. `./bindscope.json`
    /// 3. `<config dir>/bindscope/config.json`
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        let local = PathBuf::from(PROJECT_FILE);
        if local.is_file() {
            return Some(local);
        }

        dirs::config_dir()
            .map(|dir| dir.join("bindscope").join("config.json"))
            .filter(|path| path.is_file())
    }

    /// Locate and parse the configuration.
    pub fn load(explicit: Option<&Path>) -> Result<(PathBuf, Self)> {
        let path = Self::locate(explicit).ok_or_else(|| {
            Error::Config(format!(
                "no project configuration found (tried --config, ./{})",
                PROJECT_FILE
            ))
        })?;

        let config = read_json_file(&path)?;
        Ok((path, config))
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Build the engine and a manager holding every configured module and
    /// context.
    pub fn build(&self, progress: Option<Arc<dyn ProgressReporter>>) -> Result<Arc<ModuleManager>> {
        let mut builder = SnippetEngine::builder(Arc::new(self.engine.clone()))
            .scheduling(self.engine.scheduling, self.engine.max_parallel_jobs);
        if let Some(progress) = progress {
            builder = builder.progress(progress);
        }
        let engine = builder.build()?;

        let manager = ModuleManager::new(engine, Arc::new(TracingProblemSink));
        manager.set_run_automatically(self.engine.run_automatically);

        for module in &self.modules {
            manager.add_module(&module.name, module.active);
        }
        for context in &self.contexts {
            let members = ModuleContext::new(&context.name).with_members(context.members.iter().cloned());
            manager.add_module_context(members, context.active)?;
        }

        tracing::debug!(
            "Loaded {} module(s) and {} context(s)",
            self.modules.len(),
            self.contexts.len()
        );
        Ok(Arc::new(manager))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindscope_core::Representation;
    use std::fs;

    const SAMPLE: &str = r#"{
        "engine": { "interpreter": "/opt/jdk/bin/java", "support_classpath": "snippets.jar" },
        "modules": [{ "name": "com.acme.AppModule" }],
        "contexts": [
            { "name": "App", "members": [{ "module": "com.acme.AppModule" },
                                         { "module": "com.acme.DbModule", "arguments": ["jdbc:h2:mem"] }] },
            { "name": "Tests", "members": [], "active": false }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = ProjectConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.modules.len(), 1);
        assert!(!config.modules[0].active);
        assert!(config.contexts[0].active);
        assert!(!config.contexts[1].active);
        assert_eq!(config.contexts[0].members[1].arguments, ["jdbc:h2:mem"]);
    }

    #[test]
    fn test_build_registers_everything() {
        let config = ProjectConfig::from_json(SAMPLE).unwrap();
        let manager = config.build(None).unwrap();

        assert_eq!(manager.modules().len(), 1);
        // App, Tests and the module's own context.
        assert_eq!(manager.contexts().len(), 3);
        let active: Vec<String> = manager
            .active_contexts()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(active, ["App"]);
        assert_eq!(manager.dependents("com.acme.DbModule"), ["App"]);
    }

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        fs::write(&path, SAMPLE).unwrap();

        let (found, config) = ProjectConfig::load(Some(&path)).unwrap();
        assert_eq!(found, path);
        assert_eq!(config.contexts.len(), 2);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = ProjectConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");

        let err = ProjectConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("absent.json")));
    }
}

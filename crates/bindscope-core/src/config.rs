//! Engine configuration and the command provider collaborator.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable overriding the interpreter path.
pub const INTERPRETER_ENV: &str = "BINDSCOPE_JAVA";

/// Environment variable naming the snippet support library.
pub const SUPPORT_PATH_ENV: &str = "BINDSCOPE_SUPPORT_PATH";

/// Read and parse a JSON configuration file.
///
/// Read and parse failures are both reported as [`Error::Config`] naming
/// the file.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Supplies everything a job needs to build its command line.
///
/// The engine never hard-codes paths or the classpath separator; it asks the
/// provider each time a job is queued. Errors are recorded on the job and
/// delivered to its owner as launch failures.
pub trait CommandProvider: Send + Sync {
    /// Path of the interpreter that runs snippets.
    fn interpreter(&self) -> Result<PathBuf>;

    /// Classpath fragment of the snippet support library.
    fn support_path(&self) -> Result<String>;

    /// Classpath fragment of the inspected project.
    fn project_path(&self) -> Result<String>;

    /// Separator placed between classpath fragments.
    fn delimiter(&self) -> String;
}

/// How the jobs of one background batch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheduling {
    /// One OS thread per job.
    #[default]
    ThreadPerJob,
    /// A bounded thread pool (`max_parallel_jobs` threads).
    Pooled,
    /// One background thread running the batch in queue order.
    Sequential,
}

/// Configuration for the snippet engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interpreter path. Detected when absent.
    pub interpreter: Option<PathBuf>,

    /// Snippet support library. Falls back to `BINDSCOPE_SUPPORT_PATH`.
    pub support_classpath: Option<String>,

    /// Classpath entries of the inspected project.
    pub project_classpath: Vec<String>,

    /// Classpath separator. Defaults to the platform separator.
    pub delimiter: Option<String>,

    pub scheduling: Scheduling,

    /// Pool size for [`Scheduling::Pooled`].
    pub max_parallel_jobs: usize,

    /// Recompute immediately whenever a module changes.
    pub run_automatically: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            support_classpath: None,
            project_classpath: Vec::new(),
            delimiter: None,
            scheduling: Scheduling::default(),
            max_parallel_jobs: 4,
            run_automatically: false,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        read_json_file(path)
    }

    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Platform classpath separator.
    pub fn platform_delimiter() -> &'static str {
        if cfg!(windows) { ";" } else { ":" }
    }

    /// Find the interpreter.
    ///
    /// Looks in the following order:
    /// 1. The `interpreter` setting
    /// 2. `BINDSCOPE_JAVA` environment variable
    /// 3. `$JAVA_HOME/bin/java`
    /// 4. System PATH
    pub fn resolve_interpreter(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.interpreter {
            return Ok(path.clone());
        }

        if let Ok(path) = std::env::var(INTERPRETER_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
        }

        let java_name = if cfg!(windows) { "java.exe" } else { "java" };

        if let Ok(java_home) = std::env::var("JAVA_HOME") {
            let path = PathBuf::from(java_home).join("bin").join(java_name);
            if path.exists() {
                return Ok(path);
            }
        }

        which::which(java_name).map_err(|_| {
            Error::Launch(format!(
                "could not find '{}'. Set {} or JAVA_HOME, or add it to PATH.",
                java_name, INTERPRETER_ENV
            ))
        })
    }
}

impl CommandProvider for EngineConfig {
    fn interpreter(&self) -> Result<PathBuf> {
        self.resolve_interpreter()
    }

    fn support_path(&self) -> Result<String> {
        if let Some(ref path) = self.support_classpath {
            return Ok(path.clone());
        }
        std::env::var(SUPPORT_PATH_ENV).map_err(|_| {
            Error::Launch(format!(
                "no snippet support library configured. Set support_classpath or {}.",
                SUPPORT_PATH_ENV
            ))
        })
    }

    fn project_path(&self) -> Result<String> {
        Ok(self.project_classpath.join(&self.delimiter()))
    }

    fn delimiter(&self) -> String {
        self.delimiter
            .clone()
            .unwrap_or_else(|| Self::platform_delimiter().to_string())
    }
}

//! Execution jobs: the live run of one work unit in its own process.
//!
//! State machine:
//!
//! ```text
//! Pending ──run()──▶ Running ──complete()──▶ Done
//!    │                  │
//!    ├──kill()──────────┴──▶ Killed
//!    └──cancel()────────┴──▶ Cancelled
//! ```
//!
//! "Process exited" and "result applied" are separate steps: a job stays
//! `Running` until its owner calls [`ExecutionJob::complete`].

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use crate::config::CommandProvider;
use crate::error::{Error, Result};
use crate::protocol::{ResultDecoder, SnippetResult};

use super::callbacks::{JobOwner, Messenger};
use super::unit::WorkUnit;

/// Flag that precedes the classpath on every command line.
pub const CLASSPATH_FLAG: &str = "-classpath";

/// Lifecycle state of an execution job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Running,
    Done,
    Killed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Killed | JobState::Cancelled)
    }
}

struct JobInner {
    state: JobState,
    /// The child process, present only while it runs.
    child: Option<Child>,
    /// The process has exited and its output is being delivered.
    exited: bool,
}

/// Live execution of one work unit.
pub struct ExecutionJob {
    unit: Arc<WorkUnit>,
    /// Command line, or the reason it could not be built.
    command: std::result::Result<Vec<String>, String>,
    owner: Weak<dyn JobOwner>,
    inner: Mutex<JobInner>,
    finished: Condvar,
}

impl ExecutionJob {
    /// Create a pending job.
    ///
    /// The command line is built immediately. A provider failure does not
    /// fail construction; it is kept and reported as a launch failure when
    /// the job runs.
    pub fn new(
        unit: Arc<WorkUnit>,
        provider: &dyn CommandProvider,
        owner: Weak<dyn JobOwner>,
    ) -> Self {
        let command = build_command_line(&unit, provider).map_err(|e| e.to_string());

        Self {
            unit,
            command,
            owner,
            inner: Mutex::new(JobInner {
                state: JobState::Pending,
                child: None,
                exited: false,
            }),
            finished: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn unit(&self) -> &Arc<WorkUnit> {
        &self.unit
    }

    /// The command line, if it could be built.
    pub fn command_line(&self) -> Option<&[String]> {
        self.command.as_deref().ok()
    }

    /// Why the command line could not be built.
    pub fn launch_error(&self) -> Option<&str> {
        self.command.as_ref().err().map(String::as_str)
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// The owner, if it is still alive.
    pub fn owner(&self) -> Option<Arc<dyn JobOwner>> {
        self.owner.upgrade()
    }

    /// Run the process to completion and decode its result.
    ///
    /// Returns `None` when there is nothing to deliver: the job was not
    /// pending, or it was killed or cancelled before or during the run.
    /// Every other outcome, failures included, is returned for delivery.
    pub fn run(
        &self,
        messenger: &dyn Messenger,
        decoder: &dyn ResultDecoder,
    ) -> Option<Result<SnippetResult>> {
        self.run_with(messenger, decoder, |_| {})
    }

    /// [`run`](Self::run), calling `on_spawn` once the process has started.
    pub(crate) fn run_with(
        &self,
        messenger: &dyn Messenger,
        decoder: &dyn ResultDecoder,
        on_spawn: impl FnOnce(&WorkUnit),
    ) -> Option<Result<SnippetResult>> {
        {
            let mut inner = self.lock();
            if inner.state != JobState::Pending {
                return None;
            }
            inner.state = JobState::Running;
        }

        let argv = match &self.command {
            Ok(argv) => argv,
            Err(message) => return self.launch_failure(message),
        };

        let output = match self.spawn_and_read(argv, messenger, on_spawn) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(_) if self.is_done() => return None,
            Err(e) => return Some(Err(e)),
        };

        let result = decoder.decode(&output).and_then(|result| {
            if self.unit.accepts(result.kind()) {
                Ok(result)
            } else {
                Err(Error::UnexpectedResultKind {
                    expected: self.unit.expects(),
                    found: result.kind(),
                })
            }
        });

        Some(result)
    }

    /// The launch failure to deliver, unless a kill landed after the job
    /// started running.
    fn launch_failure(&self, message: &str) -> Option<Result<SnippetResult>> {
        if self.is_done() {
            return None;
        }
        Some(Err(Error::Launch(message.to_string())))
    }

    /// Spawn the process, forward stderr, and collect stdout.
    ///
    /// Returns `Ok(None)` if the job was killed while the process ran.
    fn spawn_and_read(
        &self,
        argv: &[String],
        messenger: &dyn Messenger,
        on_spawn: impl FnOnce(&WorkUnit),
    ) -> Result<Option<Vec<u8>>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Launch("empty command line".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Launch(format!("failed to start '{}': {}", program, e)))?;
        on_spawn(&self.unit);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Launch("failed to capture snippet stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Launch("failed to capture snippet stderr".to_string()))?;

        {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                // Killed between the state transition and the spawn.
                reap(&mut child);
                return Ok(None);
            }
            inner.child = Some(child);
        }

        tracing::debug!("{} started", self.unit.id());

        let mut bytes = Vec::new();
        let read = std::thread::scope(|scope| {
            scope.spawn(|| {
                for line in BufReader::new(stderr).lines() {
                    match line {
                        Ok(line) => messenger.log_message(&line),
                        Err(_) => break,
                    }
                }
            });
            BufReader::new(stdout).read_to_end(&mut bytes)
        });

        let child = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return Ok(None);
            }
            inner.exited = true;
            inner.child.take()
        };

        if let Some(mut child) = child {
            let status = child.wait()?;
            tracing::debug!("{} exited with {}", self.unit.id(), status);
        }

        read?;
        Ok(Some(bytes))
    }

    /// Terminate the job.
    ///
    /// A pending job will never start. A running process is killed and
    /// reaped before this returns. Returns `false` if the job already
    /// reached a terminal state or its process has already exited.
    pub fn kill(&self) -> bool {
        self.terminate(JobState::Killed)
    }

    /// Like [`kill`](Self::kill), but records the job as cancelled.
    pub fn cancel(&self) -> bool {
        self.terminate(JobState::Cancelled)
    }

    fn terminate(&self, to: JobState) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() || inner.exited {
            return false;
        }

        inner.state = to;
        if let Some(mut child) = inner.child.take() {
            reap(&mut child);
        }
        drop(inner);

        tracing::debug!("{} {:?}", self.unit.id(), to);
        self.finished.notify_all();
        true
    }

    /// Mark the result as applied. Idempotent; only a running job moves
    /// to `Done`.
    pub fn complete(&self) {
        let mut inner = self.lock();
        if inner.state == JobState::Running {
            inner.state = JobState::Done;
            drop(inner);
            self.finished.notify_all();
        }
    }

    /// Block until the job reaches a terminal state.
    pub fn wait(&self) -> JobState {
        let mut inner = self.lock();
        while !inner.state.is_terminal() {
            inner = self
                .finished
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inner.state
    }
}

impl std::fmt::Debug for ExecutionJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionJob")
            .field("unit", &self.unit.id())
            .field("entry_point", &self.unit.entry_point())
            .field("state", &self.state())
            .finish()
    }
}

/// Kill a child process and wait for it so no zombie is left behind.
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        // InvalidInput means the process already exited.
        if e.kind() != std::io::ErrorKind::InvalidInput {
            tracing::warn!("Failed to kill snippet process {}: {}", child.id(), e);
        }
    }
    let _ = child.wait();
}

/// `[interpreter, -classpath, support + delimiter + project, entry_point, args...]`
pub fn build_command_line(unit: &WorkUnit, provider: &dyn CommandProvider) -> Result<Vec<String>> {
    let interpreter = provider.interpreter()?;
    let classpath = format!(
        "{}{}{}",
        provider.support_path()?,
        provider.delimiter(),
        provider.project_path()?
    );

    let mut argv = Vec::with_capacity(4 + unit.arguments().len());
    argv.push(interpreter.to_string_lossy().into_owned());
    argv.push(CLASSPATH_FLAG.to_string());
    argv.push(classpath);
    argv.push(unit.entry_point().to_string());
    argv.extend(unit.arguments().iter().cloned());
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::protocol::{JsonDecoder, ResultKind};
    use crate::engine::TracingMessenger;
    use std::path::PathBuf;

    struct NoOwner;

    impl JobOwner for NoOwner {
        fn accept_result(&self, _: &ExecutionJob, _: &SnippetResult) {}
        fn accept_failure(&self, _: &ExecutionJob, _: &Error) {}
    }

    fn orphan() -> Weak<dyn JobOwner> {
        Weak::<NoOwner>::new()
    }

    fn config() -> EngineConfig {
        EngineConfig {
            interpreter: Some(PathBuf::from("/usr/bin/java")),
            support_classpath: Some("support.jar".to_string()),
            project_classpath: vec!["out".to_string(), "lib/guice.jar".to_string()],
            delimiter: Some(":".to_string()),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_command_line_layout() {
        let unit = WorkUnit::new("snippets.Module", ["com.acme.M"], ResultKind::Constructors);
        let argv = build_command_line(&unit, &config()).unwrap();
        assert_eq!(
            argv,
            vec![
                "/usr/bin/java",
                "-classpath",
                "support.jar:out:lib/guice.jar",
                "snippets.Module",
                "com.acme.M",
            ]
        );
    }

    #[test]
    fn test_delimiter_comes_from_provider() {
        let config = EngineConfig {
            delimiter: Some(";".to_string()),
            ..config()
        };
        let unit = WorkUnit::new("snippets.Module", Vec::<String>::new(), ResultKind::Constructors);
        let argv = build_command_line(&unit, &config).unwrap();
        assert_eq!(argv[2], "support.jar;out;lib/guice.jar");
    }

    #[test]
    fn test_provider_failure_is_recorded_not_raised() {
        let config = EngineConfig {
            interpreter: Some(PathBuf::from("/usr/bin/java")),
            support_classpath: None,
            ..EngineConfig::default()
        };
        // Only meaningful when the fallback variable is absent.
        if std::env::var(crate::config::SUPPORT_PATH_ENV).is_ok() {
            return;
        }

        let unit = Arc::new(WorkUnit::new("snippets.Module", ["M"], ResultKind::Constructors));
        let job = ExecutionJob::new(unit, &config, orphan());
        assert!(job.command_line().is_none());
        assert!(job.launch_error().unwrap().contains("support"));

        let outcome = job.run(&TracingMessenger, &JsonDecoder).unwrap();
        assert!(matches!(outcome, Err(Error::Launch(_))));
        assert_eq!(job.state(), JobState::Running);

        job.complete();
        assert_eq!(job.state(), JobState::Done);
    }

    #[test]
    fn test_killed_running_job_drops_launch_failure() {
        let unit = Arc::new(WorkUnit::new("snippets.Module", ["M"], ResultKind::Constructors));
        let job = ExecutionJob::new(unit, &config(), orphan());
        job.lock().state = JobState::Running;
        assert!(matches!(job.launch_failure("no classpath"), Some(Err(Error::Launch(_)))));

        assert!(job.kill());
        assert!(job.launch_failure("no classpath").is_none());
        assert_eq!(job.state(), JobState::Killed);
    }

    #[test]
    fn test_spawn_hook_fires_only_for_started_processes() {
        let missing = EngineConfig {
            interpreter: Some(PathBuf::from("/nonexistent/bindscope/java")),
            ..config()
        };
        let unit = Arc::new(WorkUnit::new("snippets.Module", ["M"], ResultKind::Constructors));
        let job = ExecutionJob::new(unit, &missing, orphan());

        let mut spawned = 0;
        let outcome = job.run_with(&TracingMessenger, &JsonDecoder, |_| spawned += 1);
        assert!(matches!(outcome, Some(Err(Error::Launch(_)))));
        assert_eq!(spawned, 0);
    }

    #[test]
    fn test_kill_pending_job_prevents_start() {
        let unit = Arc::new(WorkUnit::new("snippets.Module", ["M"], ResultKind::Constructors));
        let job = ExecutionJob::new(unit, &config(), orphan());
        assert_eq!(job.state(), JobState::Pending);

        assert!(job.kill());
        assert_eq!(job.state(), JobState::Killed);
        assert!(job.run(&TracingMessenger, &JsonDecoder).is_none());
        assert_eq!(job.wait(), JobState::Killed);

        // Terminal states are final.
        job.complete();
        assert!(!job.cancel());
        assert_eq!(job.state(), JobState::Killed);
    }

    #[test]
    fn test_run_is_noop_once_terminal() {
        let unit = Arc::new(WorkUnit::new("snippets.Module", ["M"], ResultKind::Constructors));
        let job = ExecutionJob::new(unit, &config(), orphan());
        assert!(job.cancel());
        assert!(job.run(&TracingMessenger, &JsonDecoder).is_none());
        assert_eq!(job.state(), JobState::Cancelled);
    }

    #[test]
    fn test_missing_interpreter_is_launch_failure() {
        let config = EngineConfig {
            interpreter: Some(PathBuf::from("/nonexistent/bindscope/java")),
            ..config()
        };
        let unit = Arc::new(WorkUnit::new("snippets.Module", ["M"], ResultKind::Constructors));
        let job = ExecutionJob::new(unit, &config, orphan());

        let outcome = job.run(&TracingMessenger, &JsonDecoder).unwrap();
        assert!(matches!(outcome, Err(Error::Launch(_))));
    }
}

//! Shared fixtures for integration tests.
//!
//! A small shell script stands in for the interpreter. It receives the
//! usual `[-classpath, cp, entry, args...]` and answers by entry point:
//!
//! - `fixture.Echo <json>` prints its first argument
//! - `fixture.Stderr <json> <line>` prints `<line>` to stderr, then the json
//! - `fixture.Sleep` sleeps for a long time
//! - `fixture.Silent` exits without output
//! - the module snippet reports one default constructor, or sleeps for
//!   `*Sleepy*` classes
//! - the context snippet reports three bindings, after a second's pause for
//!   `*Slow*` members, unless a member class name contains `Silent`,
//!   `Garbage`, `Wrong`, `Broken` or `Sleepy`

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use bindscope_core::{
    CollectingProblemSink, EngineConfig, ModuleManager, Scheduling, SnippetEngine,
};
use tempfile::TempDir;

pub const ECHO: &str = "fixture.Echo";
pub const STDERR: &str = "fixture.Stderr";
pub const SLEEP: &str = "fixture.Sleep";
pub const SILENT: &str = "fixture.Silent";

const SCRIPT: &str = r##"#!/bin/sh
entry="$3"
shift 3
case "$entry" in
  fixture.Echo)
    printf '%s\n' "$1"
    ;;
  fixture.Stderr)
    printf '%s\n' "$2" >&2
    printf '%s\n' "$1"
    ;;
  fixture.Sleep)
    exec sleep 30
    ;;
  fixture.Silent)
    exit 0
    ;;
  *ModuleSnippet)
    case "$1" in
      *Sleepy*) exec sleep 30 ;;
    esac
    echo '{"kind":"constructors","constructors":[[]],"has_default_constructor":true}'
    ;;
  *ContextSnippet)
    all="$*"
    case "$all" in
      *Sleepy*) exec sleep 30 ;;
      *Slow*) sleep 1 ;;
      *Silent*) exit 0 ;;
      *Garbage*) echo 'this is not a result'; exit 0 ;;
      *Wrong*) echo '{"kind":"constructors","constructors":[]}'; exit 0 ;;
      *Broken*)
        echo 'Creating injector' >&2
        echo '{"kind":"problems","problems":[{"kind":"creation","subject":"com.acme.Broken","message":"no default constructor"}]}'
        exit 0
        ;;
    esac
    echo '{"kind":"bindings","bindings":[{"type":"interface com.acme.Foo","target":"com.acme.FooImpl","source":"com.acme.AppModule.configure(AppModule.java:12)"},{"type":"com.acme.Bar","annotation":"@com.acme.Fast","target":"com.acme.FastBar"},{"type":"class com.acme.Baz","scope":"Singleton"}],"problems":[]}'
    ;;
  *)
    echo "unknown entry point $entry" >&2
    exit 1
    ;;
esac
"##;

static FIXTURE: OnceLock<(TempDir, PathBuf)> = OnceLock::new();

/// Path of the fake interpreter, written once per test binary.
pub fn interpreter() -> &'static Path {
    let (_, path) = FIXTURE.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake-java");
        fs::write(&path, SCRIPT).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    });
    path
}

pub fn config(scheduling: Scheduling) -> EngineConfig {
    EngineConfig {
        interpreter: Some(interpreter().to_path_buf()),
        support_classpath: Some("support.jar".to_string()),
        project_classpath: vec!["project/classes".to_string()],
        scheduling,
        ..EngineConfig::default()
    }
}

pub fn engine() -> SnippetEngine {
    SnippetEngine::from_config(config(Scheduling::ThreadPerJob)).unwrap()
}

pub fn manager() -> (Arc<ModuleManager>, Arc<CollectingProblemSink>) {
    let sink = Arc::new(CollectingProblemSink::new());
    let manager = ModuleManager::new(engine(), sink.clone());
    (Arc::new(manager), sink)
}

/// Poll until `condition` holds or a generous deadline passes.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

//! End-to-end recomputation through the module manager.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::sync::mpsc;

use bindscope_core::model::{CONTEXT_SNIPPET, MODULE_SNIPPET};
use bindscope_core::{
    ModuleContext, ModuleInstance, ModuleManager, ProblemKind, Representation, Resolution,
};

fn context(name: &str, modules: &[&str]) -> ModuleContext {
    ModuleContext::new(name).with_members(modules.iter().map(|m| ModuleInstance::new(*m)))
}

fn add(manager: &ModuleManager, name: &str, modules: &[&str]) -> Arc<ModuleContext> {
    manager.add_module_context(context(name, modules), true).unwrap()
}

#[test]
fn test_context_gets_bindings() {
    let (manager, sink) = common::manager();
    let app = add(&manager, "App", &["com.acme.AppModule"]);
    assert!(app.is_dirty());

    assert!(manager.update(true, true));
    assert!(!app.is_dirty());
    assert_eq!(app.binding_count(), 3);
    assert!(app.problems().is_empty());
    assert!(sink.is_empty());
}

#[test]
fn test_shared_module_runs_once() {
    let (manager, _) = common::manager();
    manager.add_module("com.acme.M", false);
    let one = add(&manager, "One", &["com.acme.M"]);
    let two = add(&manager, "Two", &["com.acme.M", "com.acme.Other"]);
    assert!(manager.update(true, true));
    assert_eq!(manager.engine().launched(MODULE_SNIPPET), 1);
    assert!(!one.is_dirty() && !two.is_dirty());

    manager.module_changed("com.acme.M");
    assert!(one.is_dirty() && two.is_dirty());
    assert!(manager.module("com.acme.M").unwrap().is_dirty());

    assert!(manager.update(true, true));
    assert!(!one.is_dirty());
    assert!(!two.is_dirty());
    assert!(!manager.module("com.acme.M").unwrap().is_dirty());
    assert_eq!(manager.engine().launched(MODULE_SNIPPET), 2);
    assert_eq!(manager.engine().launched(CONTEXT_SNIPPET), 4);
}

#[test]
fn test_empty_output_keeps_context_dirty() {
    let (manager, _) = common::manager();
    let silent = add(&manager, "Silent", &["com.acme.SilentModule"]);

    assert!(manager.update(true, true));
    assert!(silent.is_dirty());
    let error = silent.last_error().unwrap();
    assert!(error.starts_with("deserialization error"), "{}", error);

    // The next update retries it.
    assert!(manager.update(true, true));
    assert_eq!(manager.engine().launched(CONTEXT_SNIPPET), 2);
}

#[test]
fn test_unrelated_context_is_untouched() {
    let (manager, _) = common::manager();
    let one = add(&manager, "One", &["com.acme.A"]);
    let two = add(&manager, "Two", &["com.acme.B"]);
    assert!(manager.update(true, true));
    let before = two.bindings();

    manager.module_changed("com.acme.A");
    assert!(manager.update(true, true));

    assert!(!one.is_dirty());
    assert!(!two.is_dirty());
    assert_eq!(two.bindings(), before);
    assert_eq!(manager.engine().launched(CONTEXT_SNIPPET), 3);
}

#[test]
fn test_clean_graph_queues_nothing() {
    let (manager, _) = common::manager();
    add(&manager, "App", &["com.acme.AppModule"]);
    assert!(manager.update(true, true));

    assert!(manager.update(true, true));
    assert!(manager.update(true, false));
    assert_eq!(manager.engine().launched(CONTEXT_SNIPPET), 1);
}

#[test]
fn test_inactive_context_is_not_recomputed() {
    let (manager, _) = common::manager();
    let off = manager
        .add_module_context(context("Off", &["com.acme.AppModule"]), false)
        .unwrap();

    assert!(manager.update(true, true));
    assert!(off.is_dirty());
    assert_eq!(manager.engine().launched(CONTEXT_SNIPPET), 0);

    manager.activate_module_context("Off").unwrap();
    assert!(manager.update(true, true));
    assert!(!off.is_dirty());
}

#[test]
fn test_find_location_and_source() {
    let (manager, _) = common::manager();
    add(&manager, "App", &["com.acme.AppModule"]);
    assert!(manager.update(true, true));

    let (context, info) = manager.find_location("com.acme.Foo", None).unwrap();
    assert_eq!(context, "App");
    assert_eq!(info.target.as_deref(), Some("com.acme.FooImpl"));
    let location = info.location().unwrap();
    assert_eq!(location.file.as_deref(), Some("AppModule.java"));
    assert_eq!(location.line, Some(12));

    assert!(manager.find_location("com.acme.Bar", Some("com.acme.Fast")).is_some());
    assert!(manager.find_location("com.acme.Baz", None).is_some());
    assert!(manager.find_location("com.acme.Missing", None).is_none());
}

#[test]
fn test_problems_reach_the_sink() {
    let (manager, sink) = common::manager();
    let broken = add(&manager, "Broken", &["com.acme.Broken"]);

    assert!(manager.update(true, true));
    assert!(!broken.is_dirty());
    assert_eq!(broken.binding_count(), 0);

    let reported = sink.problems();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0, "Broken");
    assert_eq!(reported[0].1.kind, ProblemKind::Creation);
    assert_eq!(reported[0].1.module_context, "Broken");
    assert_eq!(manager.problems().len(), 1);
}

#[test]
fn test_wrong_result_kind_surfaces_problem() {
    let (manager, sink) = common::manager();
    let wrong = add(&manager, "Wrong", &["com.acme.WrongModule"]);

    assert!(manager.update(true, true));
    assert!(wrong.is_dirty());
    assert_eq!(wrong.problems()[0].kind, ProblemKind::UnexpectedResult);
    assert_eq!(sink.len(), 1);
}

#[test]
fn test_run_automatically() {
    let (manager, _) = common::manager();
    let app = add(&manager, "App", &["com.acme.AppModule"]);
    manager.set_run_automatically(true);

    manager.module_changed("com.acme.AppModule");
    manager.engine().wait_for();
    assert!(common::eventually(|| !app.is_dirty()));
    assert_eq!(app.binding_count(), 3);
}

#[test]
fn test_update_async() {
    let (manager, _) = common::manager();
    let app = add(&manager, "App", &["com.acme.AppModule"]);

    let (tx, rx) = mpsc::channel();
    let handle = manager.update_async(true, move |success| tx.send(success).unwrap());
    assert!(rx.recv().unwrap());
    handle.join().unwrap();
    assert!(!app.is_dirty());
}

#[test]
fn test_resolve() {
    let (manager, _) = common::manager();
    add(&manager, "App", &["com.acme.AppModule"]);
    add(&manager, "Broken", &["com.acme.Broken"]);

    match manager.resolve("com.acme.Bar", Some("@com.acme.Fast"), true) {
        Resolution::Resolved { bindings, problems } => {
            assert_eq!(bindings.len(), 1);
            assert_eq!(bindings[0].0, "App");
            assert_eq!(bindings[0].1.target.as_deref(), Some("com.acme.FastBar"));
            assert_eq!(problems.len(), 1);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_resolve_without_waiting_is_pending() {
    let (manager, _) = common::manager();
    add(&manager, "Sleepy", &["com.acme.SleepyModule"]);

    assert_eq!(manager.resolve("com.acme.Foo", None, false), Resolution::Pending);
    manager.engine().cancel();
    manager.engine().wait_for();
    assert!(manager.engine().is_cancelled());
}

#[test]
fn test_cancelled_update_reports_failure() {
    let (manager, _) = common::manager();
    let sleepy = add(&manager, "Sleepy", &["com.acme.SleepyModule"]);

    let canceller = {
        let engine = manager.engine().clone();
        std::thread::spawn(move || {
            assert!(common::eventually(|| engine.launched(CONTEXT_SNIPPET) == 1));
            engine.cancel();
        })
    };
    assert!(!manager.update(true, true));
    canceller.join().unwrap();
    assert!(sleepy.is_dirty());
}

#[test]
fn test_change_during_flight_recomputes_before_resolving() {
    let (manager, _) = common::manager();
    let app = add(&manager, "App", &["com.acme.SlowModule"]);

    assert!(manager.update(false, true));
    assert!(common::eventually(|| manager.engine().launched(CONTEXT_SNIPPET) == 1));
    manager.module_changed("com.acme.SlowModule");

    match manager.resolve("com.acme.Foo", None, true) {
        Resolution::Resolved { bindings, .. } => assert_eq!(bindings.len(), 1),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!app.is_dirty());
    assert_eq!(app.binding_count(), 3);
    assert_eq!(manager.engine().launched(CONTEXT_SNIPPET), 2);
}

//! `bindscope resolve`: where is a type bound, and to what?

use bindscope_core::{BindingInfo, Error, ModuleManager, Problem, Representation, Resolution};

use crate::colors;

/// Recompute the active contexts and print the bindings of one type.
pub fn execute(manager: &ModuleManager, bound_type: &str, annotation: Option<&str>) -> anyhow::Result<()> {
    let query = match annotation {
        Some(annotation) => format!("@{} {}", annotation.trim_start_matches('@'), bound_type),
        None => bound_type.to_string(),
    };
    println!("{}Resolving{} {}", colors::BOLD, colors::RESET, query);

    let (bindings, problems) = match manager.resolve(bound_type, annotation, true) {
        Resolution::Resolved { bindings, problems } => (bindings, problems),
        Resolution::Cancelled => return Err(Error::Aborted.into()),
        Resolution::Pending => anyhow::bail!("resolution of {} is still pending", query),
    };

    report_stale(manager);

    if bindings.is_empty() {
        println!("{}No binding for {}{}", colors::YELLOW, query, colors::RESET);
    }
    for (context, info) in &bindings {
        println!("  {}{}{}: {}", colors::CYAN, context, colors::RESET, describe(info));
    }

    print_problems(&problems);
    Ok(())
}

/// One-line rendering of a binding: target, scope and source location.
pub fn describe(info: &BindingInfo) -> String {
    let mut line = format!("{}", info.key);
    if let Some(ref target) = info.target {
        line.push_str(&format!(" → {}", target));
    }
    if let Some(ref scope) = info.scope {
        line.push_str(&format!(" [{}]", scope));
    }
    if let Some(location) = info.location() {
        line.push_str(&format!(" {}({}){}", colors::DIM, location, colors::RESET));
    }
    line
}

pub fn print_problems(problems: &[Problem]) {
    if problems.is_empty() {
        return;
    }
    println!("\n{}Problems:{}", colors::BOLD, colors::RESET);
    for problem in problems {
        println!("  {}✗{} {}", colors::RED, colors::RESET, problem);
    }
}

/// Warn about active contexts whose last job failed.
pub fn report_stale(manager: &ModuleManager) {
    for context in manager.active_contexts() {
        if let Some(error) = context.last_error().filter(|_| context.is_dirty()) {
            eprintln!(
                "{}warning:{} {} could not be recomputed: {}",
                colors::YELLOW,
                colors::RESET,
                context.name(),
                error
            );
        }
    }
}

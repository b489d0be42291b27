//! `bindscope bindings`: print the binding tables of the active contexts.

use bindscope_core::{Error, ModuleManager, Representation};

use crate::colors;
use crate::resolve::{describe, print_problems, report_stale};

pub fn execute(manager: &ModuleManager, context: Option<&str>) -> anyhow::Result<()> {
    if let Some(name) = context {
        manager.activate_module_context(name)?;
    }

    if !manager.update(true, true) {
        return Err(Error::Aborted.into());
    }
    report_stale(manager);

    let contexts: Vec<_> = manager
        .active_contexts()
        .into_iter()
        .filter(|c| context.is_none_or(|name| c.name() == name))
        .collect();

    if contexts.is_empty() {
        println!("{}No active module contexts.{}", colors::YELLOW, colors::RESET);
        return Ok(());
    }

    for ctx in &contexts {
        let bindings = ctx.bindings();
        println!(
            "\n{}{}{} {}",
            colors::BOLD,
            ctx.name(),
            colors::RESET,
            colors::dim_count(bindings.len(), "binding")
        );
        println!("{}", "─".repeat(50));
        for info in &bindings {
            println!("  {}", describe(info));
        }
        print_problems(&ctx.problems());
    }

    Ok(())
}

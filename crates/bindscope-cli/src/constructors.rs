//! `bindscope constructors`: introspect one module class.

use bindscope_core::{ModuleManager, Representation};

use crate::colors;
use crate::resolve::print_problems;

pub fn execute(manager: &ModuleManager, module: &str) -> anyhow::Result<()> {
    let module = manager.module(module).unwrap_or_else(|| manager.add_module(module, false));

    module.clean(manager.engine());
    manager.engine().run("Introspecting module", false);

    if module.is_dirty() {
        if let Some(error) = module.last_error() {
            anyhow::bail!("could not introspect {}: {}", module.name(), error);
        }
    }

    println!("{}{}{}", colors::BOLD, module.name(), colors::RESET);
    let constructors = module.constructors();
    if constructors.is_empty() && module.problems().is_empty() {
        println!("  {}no public constructors{}", colors::DIM, colors::RESET);
    }
    for signature in &constructors {
        if signature.is_default() {
            println!("  {} {}(default){}", signature, colors::GREEN, colors::RESET);
        } else {
            println!("  {}", signature);
        }
    }
    if !module.has_default_constructor() {
        println!(
            "{}  not usable as a context member without arguments{}",
            colors::YELLOW,
            colors::RESET
        );
    }

    print_problems(&module.problems());
    Ok(())
}

//! bindscope CLI - inspect dependency-injection bindings of a project.

mod bindings;
mod colors;
mod constructors;
mod progress;
mod project;
mod resolve;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use bindscope_core::model::{CONTEXT_SNIPPET, MODULE_SNIPPET};
use bindscope_core::{ModuleManager, ProgressReporter};

use crate::progress::TerminalProgress;
use crate::project::ProjectConfig;

#[derive(Parser)]
#[command(name = "bindscope")]
#[command(about = "Inspect dependency-injection bindings by building injectors in isolated processes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project configuration file (default: ./bindscope.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print how many snippet processes were launched
    #[arg(long, global = true)]
    stats: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Find where a type is bound in the active module contexts
    Resolve {
        /// Fully qualified type name
        #[arg(value_name = "TYPE")]
        bound_type: String,

        /// Binding annotation, with or without the leading '@'
        #[arg(short, long)]
        annotation: Option<String>,
    },

    /// Print the binding tables of the active module contexts
    Bindings {
        /// Only this context (activated if needed)
        #[arg(long)]
        context: Option<String>,
    },

    /// List the constructors of a module class
    Constructors {
        /// Fully qualified module class name
        module: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format bindscope-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<bindscope_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    let manager = load_manager(&cli).map_err(format_error)?;

    match cli.command {
        Commands::Resolve {
            ref bound_type,
            ref annotation,
        } => resolve::execute(&manager, bound_type, annotation.as_deref()).map_err(format_error)?,

        Commands::Bindings { ref context } => {
            bindings::execute(&manager, context.as_deref()).map_err(format_error)?;
        }

        Commands::Constructors { ref module } => {
            constructors::execute(&manager, module).map_err(format_error)?;
        }
    }

    if cli.stats {
        print_stats(&manager);
    }

    Ok(())
}

fn load_manager(cli: &Cli) -> anyhow::Result<Arc<ModuleManager>> {
    let (path, config) = ProjectConfig::load(cli.config.as_deref())?;
    tracing::debug!("Using project configuration {}", path.display());

    let progress: Arc<dyn ProgressReporter> = Arc::new(TerminalProgress::new(cli.verbose));
    Ok(config.build(Some(progress))?)
}

fn print_stats(manager: &ModuleManager) {
    let engine = manager.engine();
    println!(
        "\n{}Launched{} {} module snippet(s), {} context snippet(s)",
        colors::DIM,
        colors::RESET,
        engine.launched(MODULE_SNIPPET),
        engine.launched(CONTEXT_SNIPPET)
    );
}

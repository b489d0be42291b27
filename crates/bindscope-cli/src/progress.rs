//! Terminal progress output for snippet batches.

use bindscope_core::{ProgressReporter, WorkUnit};

use crate::colors;

/// Prints one line per batch and one per finished job.
pub struct TerminalProgress {
    verbose: bool,
}

impl TerminalProgress {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

/// Last segment of a dotted entry point.
fn short_name(entry_point: &str) -> &str {
    entry_point.rsplit('.').next().unwrap_or(entry_point)
}

impl ProgressReporter for TerminalProgress {
    fn on_batch_started(&self, label: &str, total: usize, _background: bool) {
        if total == 0 {
            return;
        }
        println!(
            "{}▶ {}{} {}",
            colors::CYAN,
            label,
            colors::RESET,
            colors::dim_count(total, "job")
        );
        colors::flush_stdout();
    }

    fn on_job_finished(&self, unit: &WorkUnit, finished: usize, total: usize) {
        if !self.verbose {
            return;
        }
        println!(
            "  {}[{}/{}]{} {} {}",
            colors::DIM,
            finished,
            total,
            colors::RESET,
            short_name(unit.entry_point()),
            unit.arguments().first().map(String::as_str).unwrap_or("")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("bindscope.snippets.ModuleSnippet"), "ModuleSnippet");
        assert_eq!(short_name("Plain"), "Plain");
    }
}

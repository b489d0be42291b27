//! ANSI styling for bindscope's terminal output.

use std::io::{self, Write};

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";
pub const RED: &str = "\x1b[31m";

/// `"1 job"`, `"3 jobs"`.
pub fn count(n: usize, noun: &str) -> String {
    format!("{} {}{}", n, noun, if n == 1 { "" } else { "s" })
}

/// Dimmed `(N nouns)` suffix used after batch and context headers.
pub fn dim_count(n: usize, noun: &str) -> String {
    format!("{}({}){}", DIM, count(n, noun), RESET)
}

/// Batch headers are printed before the jobs' processes start; flush so
/// they appear ahead of any snippet stderr forwarded to the log.
pub fn flush_stdout() {
    io::stdout().flush().ok();
}

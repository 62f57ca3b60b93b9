//! Structured report output.
//!
//! There is no process-global logger: a [Reporter] is constructed once per
//! CLI invocation and passed by reference into every component that needs to
//! talk to the user. All machine-scrapable lines carry a `[INFO]` / `[WARN]`
//! / `[ERROR]` prefix.

use console::style;

/// Per-invocation reporting context.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    verbose: bool,
}

impl Reporter {
    /// Create a reporter; `verbose` gates detail lines.
    pub fn new(verbose: bool) -> Self {
        Reporter { verbose }
    }

    /// Print an informational line to stdout.
    pub fn info(&self, message: &str) {
        println!("{} {}", style("[INFO]").green(), message);
    }

    /// Print a warning line to stderr.
    pub fn warn(&self, message: &str) {
        eprintln!("{} {}", style("[WARN]").yellow(), message);
    }

    /// Print an error line to stderr.
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("[ERROR]").red(), message);
    }

    /// Print a detail line to stdout, only in verbose mode.
    pub fn detail(&self, message: &str) {
        if self.verbose {
            println!("{} {}", style("[INFO]").green().dim(), message);
        }
    }

    /// Print an unprefixed line to stdout (command results).
    pub fn plain(&self, message: &str) {
        println!("{}", message);
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

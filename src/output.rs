use std::io::Write;

/// Abstraction over user-facing output.
///
/// Command modules use this trait instead of `println!`/`eprintln!`; logs
/// go to stderr through `tracing` and stay separate from results.
pub trait UserOutput: Send + Sync {
    /// Result lines (tables, JSON, paths).
    fn status(&self, message: &str);

    /// Success message (e.g., "Instance 'prod01' started")
    fn success(&self, message: &str);

    /// Warning message (e.g., "Restart pending")
    fn warning(&self, message: &str);

    /// Error message
    fn error(&self, message: &str);

    /// Inline progress (no trailing newline). Call `finish_progress` after.
    fn progress(&self, message: &str);

    /// Finish an inline progress line with a result.
    fn finish_progress(&self, result: &str);

    /// A blank line separator.
    fn blank(&self);
}

/// Standard CLI output: results on stdout, warnings and errors on stderr.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("\x1b[32m{}\x1b[0m", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33m{}\x1b[0m", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn progress(&self, message: &str) {
        eprint!("{}", message);
        std::io::stderr().flush().ok();
    }

    fn finish_progress(&self, result: &str) {
        eprintln!("{}", result);
    }

    fn blank(&self) {
        println!();
    }
}

//! Operator confirmation for destructive operations.

use std::io::{stderr, stdin, BufRead, IsTerminal, Write};

pub trait Confirm: Send + Sync {
    /// Ask the operator to approve `description`.
    fn confirm(&self, description: &str) -> bool;
}

/// Approves everything (`--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _description: &str) -> bool {
        true
    }
}

/// Declines everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeNo;

impl Confirm for AssumeNo {
    fn confirm(&self, _description: &str) -> bool {
        false
    }
}

/// Prompts on a TTY; returns `default` when not interactive.
#[derive(Debug, Clone, Copy)]
pub struct TerminalConfirm {
    default: bool,
}

impl TerminalConfirm {
    pub fn new(default: bool) -> Self {
        Self { default }
    }
}

impl Default for TerminalConfirm {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Confirm for TerminalConfirm {
    fn confirm(&self, description: &str) -> bool {
        if !is_interactive() {
            return self.default;
        }
        let hint = if self.default { "[Y/n]" } else { "[y/N]" };
        eprint!("{} {} ", description, hint);
        let _ = stderr().flush();

        let mut line = String::new();
        if stdin().lock().read_line(&mut line).is_err() {
            return self.default;
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => true,
            "n" | "no" => false,
            _ => self.default,
        }
    }
}

fn is_interactive() -> bool {
    if std::env::var_os("MYFLEET_NON_INTERACTIVE").is_some() {
        return false;
    }
    // Cargo test binaries run from target/*/deps/
    if let Ok(exe) = std::env::current_exe() {
        if let Some(path) = exe.to_str() {
            if path.contains("/deps/") {
                return false;
            }
        }
    }
    stdin().is_terminal() && stderr().is_terminal()
}

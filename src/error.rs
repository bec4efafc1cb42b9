// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of every [`Error`], used for exit codes and for
/// deciding where an error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad operator input. Always recoverable by re-invoking with a fixed value.
    Validation,
    /// Name or port collision, or a registry lock held by someone else.
    Conflict,
    /// Wrong lifecycle state or an unmet dependency.
    Precondition,
    /// A delegated process failed, timed out, or could not be spawned.
    ExternalTool,
    /// Registry or file persistence failure.
    Persistence,
    /// Internal invariant violation.
    Fatal,
}

impl ErrorKind {
    /// CLI exit code for this class of error.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Validation => 1,
            ErrorKind::Conflict | ErrorKind::Precondition => 2,
            ErrorKind::ExternalTool => 3,
            ErrorKind::Persistence | ErrorKind::Fatal => 4,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Precondition => write!(f, "precondition"),
            ErrorKind::ExternalTool => write!(f, "external-tool"),
            ErrorKind::Persistence => write!(f, "persistence"),
            ErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// Where a restore stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    /// Nothing was sent to the server (missing file, checksum mismatch, connect failure).
    BeforeExecution,
    /// The server rejected a statement part-way through the dump.
    DuringExecution,
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestorePhase::BeforeExecution => write!(f, "before statement execution"),
            RestorePhase::DuringExecution => write!(f, "during statement execution"),
        }
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    #[diagnostic(code(myfleet::validation))]
    Validation(String),

    #[error("Invalid value '{value}' for '{key}': expected {expected}")]
    #[diagnostic(
        code(myfleet::parameter::invalid_value),
        help("Re-run with a value matching: {expected}")
    )]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },

    #[error("Instance '{0}' is not registered")]
    #[diagnostic(
        code(myfleet::instance::not_found),
        help("List registered instances with `myfleet list`")
    )]
    NotFound(String),

    #[error("Parameter '{key}' is not set in {path}")]
    #[diagnostic(code(myfleet::parameter::not_found))]
    ParameterNotFound { key: String, path: String },

    #[error("Conflict: {0}")]
    #[diagnostic(code(myfleet::conflict))]
    Conflict(String),

    #[error("Port {port} is already {holder}")]
    #[diagnostic(
        code(myfleet::port::conflict),
        help("Pick another port, or run `myfleet suggest-port` for a free one")
    )]
    PortConflict { port: u16, holder: String },

    #[error("Instance '{name}' is locked by another operation (waited {}s)", .waited.as_secs())]
    #[diagnostic(
        code(myfleet::registry::busy),
        help("Another myfleet command is working on this instance. Retry once it finishes")
    )]
    Busy { name: String, waited: Duration },

    #[error("Cannot {operation} instance '{name}' while it is {state}")]
    #[diagnostic(
        code(myfleet::lifecycle::invalid_transition),
        help("Check the instance state with `myfleet status {name}`")
    )]
    InvalidTransition {
        name: String,
        operation: String,
        state: String,
    },

    #[error("Precondition failed: {0}")]
    #[diagnostic(code(myfleet::precondition))]
    Precondition(String),

    #[error("Operation aborted by operator")]
    Aborted,

    #[error("'{command}' failed{}: {stderr}",
        .exit_code.map(|c| format!(" (exit code {})", c)).unwrap_or_default()
    )]
    #[diagnostic(code(myfleet::external::failed))]
    ExternalTool {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Timed out running '{command}' (exceeded {} seconds)", .timeout.as_secs())]
    #[diagnostic(code(myfleet::external::timeout))]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Failed to execute '{command}': {source}")]
    #[diagnostic(
        code(myfleet::external::spawn),
        help("Check that the command exists and is executable")
    )]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Service supervisor unavailable: {0}")]
    #[diagnostic(
        code(myfleet::supervisor::unavailable),
        help("Check that systemd is running with `systemctl is-system-running`")
    )]
    Unavailable(String),

    #[error("Restore failed {phase}: {detail}")]
    #[diagnostic(
        code(myfleet::restore::failed),
        help("A partially applied restore is not rolled back. Re-provision from a clean state before retrying")
    )]
    RestoreFailed { phase: RestorePhase, detail: String },

    #[error("Upgrade of '{name}' failed at {step}: {source}")]
    UpgradeFailed {
        name: String,
        step: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Registry error: {0}")]
    #[diagnostic(code(myfleet::registry::error))]
    Persistence(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(myfleet::config::error))]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(myfleet::fatal))]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build an [`Error::ExternalTool`] keeping only the tail of a long stderr.
    pub fn external(command: impl Into<String>, exit_code: Option<i32>, stderr: &str) -> Self {
        Error::ExternalTool {
            command: command.into(),
            exit_code,
            stderr: stderr_excerpt(stderr),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::InvalidValue { .. } | Error::Aborted => {
                ErrorKind::Validation
            }
            Error::Conflict(_) | Error::PortConflict { .. } | Error::Busy { .. } => {
                ErrorKind::Conflict
            }
            Error::NotFound(_)
            | Error::ParameterNotFound { .. }
            | Error::InvalidTransition { .. }
            | Error::Precondition(_) => ErrorKind::Precondition,
            Error::ExternalTool { .. }
            | Error::CommandTimeout { .. }
            | Error::Spawn { .. }
            | Error::Unavailable(_)
            | Error::RestoreFailed { .. } => ErrorKind::ExternalTool,
            Error::UpgradeFailed { source, .. } => source.kind(),
            Error::Persistence(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Yaml(_)
            | Error::Json(_) => ErrorKind::Persistence,
            Error::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::NotFound(_) => {
                Some("List registered instances with: myfleet list".to_string())
            }
            Error::PortConflict { .. } => Some(
                "Run `myfleet suggest-port` to find a port no instance or listener uses.".to_string(),
            ),
            Error::Busy { name, .. } => Some(format!(
                "Another command holds the lock for '{}'. Wait for it to finish, then retry.",
                name
            )),
            Error::InvalidTransition { name, state, .. } => {
                if matches!(state.as_str(), "initializing" | "upgrading" | "removing") {
                    Some(format!(
                        "'{}' is stuck in a transient state. Inspect it manually; there is no automatic recovery.",
                        name
                    ))
                } else {
                    Some(format!("Check the instance with: myfleet status {}", name))
                }
            }
            Error::Spawn { .. } => {
                Some("Check that the command exists and is executable".to_string())
            }
            Error::RestoreFailed {
                phase: RestorePhase::DuringExecution,
                ..
            } => Some(
                "The server may hold a partial restore. Re-provision the instance before restoring again."
                    .to_string(),
            ),
            Error::UpgradeFailed { step, .. } if step == "package-swap" => Some(
                "The package manager may be in a mixed state. Inspect it with `rpm -qa 'mysql*'` before retrying."
                    .to_string(),
            ),
            Error::Persistence(_) | Error::Yaml(_) => Some(
                "Check the registry directory permissions and the instance YAML documents.".to_string(),
            ),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

const STDERR_EXCERPT_LINES: usize = 20;

/// Last few non-empty lines of a tool's stderr.
pub fn stderr_excerpt(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_EXCERPT_LINES);
    lines[start..].join("\n")
}

//! Single chokepoint for every external tool invocation.
//!
//! Orchestrators describe a process with [`CommandSpec`] and hand it to a
//! [`CommandExecutor`]. Production code uses [`SystemExecutor`]; tests
//! substitute a scripted executor.

mod system;

pub use system::SystemExecutor;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a child's stdin comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinSource {
    Null,
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// Where a child's stdout goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdoutTarget {
    Capture,
    File(PathBuf),
}

/// Description of one external process.
///
/// Arguments are logged and may show up in error messages, so secrets must
/// travel through files or stdin, never argv.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: StdinSource,
    pub stdout: StdoutTarget,
    pub timeout: Duration,
    /// Needs root; prefixed with `sudo` when allowed and not already root.
    pub privileged: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: StdinSource::Null,
            stdout: StdoutTarget::Capture,
            timeout: DEFAULT_TIMEOUT,
            privileged: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = StdinSource::Bytes(bytes.into());
        self
    }

    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = StdinSource::File(path.into());
        self
    }

    pub fn stdout_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = StdoutTarget::File(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Human-readable command line used in logs and errors.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Structured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Empty when stdout was redirected to a file.
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into [`Error::ExternalTool`].
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::external(command, self.exit_code, &self.stderr))
        }
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a process to completion. A non-zero exit is not an error here.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run a process and fail unless it exits 0.
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(spec).await?;
        output.check(&spec.display())
    }
}

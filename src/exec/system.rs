use super::{CommandExecutor, CommandOutput, CommandSpec, StdinSource, StdoutTarget};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// [`CommandExecutor`] backed by `tokio::process`.
///
/// Children are killed when their timeout expires.
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    use_sudo: bool,
}

impl SystemExecutor {
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    fn needs_sudo(&self, spec: &CommandSpec) -> bool {
        spec.privileged && self.use_sudo && !nix::unistd::geteuid().is_root()
    }

    fn build(&self, spec: &CommandSpec) -> Result<Command> {
        let mut cmd = if self.needs_sudo(spec) {
            let mut cmd = Command::new("sudo");
            cmd.arg(&spec.program);
            cmd
        } else {
            Command::new(&spec.program)
        };
        cmd.args(&spec.args)
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match &spec.stdin {
            StdinSource::Null => {
                cmd.stdin(Stdio::null());
            }
            StdinSource::Bytes(_) => {
                cmd.stdin(Stdio::piped());
            }
            StdinSource::File(path) => {
                let file = std::fs::File::open(path).map_err(|e| Error::Spawn {
                    command: format!("{} < {}", spec.display(), path.display()),
                    source: e,
                })?;
                cmd.stdin(Stdio::from(file));
            }
        }

        match &spec.stdout {
            StdoutTarget::Capture => {
                cmd.stdout(Stdio::piped());
            }
            StdoutTarget::File(path) => {
                let file = std::fs::File::create(path).map_err(|e| Error::Spawn {
                    command: format!("{} > {}", spec.display(), path.display()),
                    source: e,
                })?;
                cmd.stdout(Stdio::from(file));
            }
        }

        Ok(cmd)
    }
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let shown = spec.display();
        debug!("Running: {}", shown);

        let mut child = self.build(spec)?.spawn().map_err(|e| Error::Spawn {
            command: shown.clone(),
            source: e,
        })?;

        let feeder = match (&spec.stdin, child.stdin.take()) {
            (StdinSource::Bytes(bytes), Some(mut stdin)) => {
                let bytes = bytes.clone();
                Some(tokio::spawn(async move {
                    let result = stdin.write_all(&bytes).await;
                    drop(stdin);
                    result
                }))
            }
            _ => None,
        };

        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::Spawn {
                    command: shown,
                    source: e,
                })
            }
            Err(_) => {
                warn!("Timed out after {:?}: {}", spec.timeout, shown);
                return Err(Error::CommandTimeout {
                    command: shown,
                    timeout: spec.timeout,
                });
            }
        };

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    debug!("Writing stdin to '{}' failed: {}", shown, e);
                }
                _ => {}
            }
        }

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("'{}' exited with {:?}", shown, result.exit_code);
        Ok(result)
    }
}

use super::{ProcessSupervisor, UnitStatus};
use crate::atomic::atomic_write;
use crate::error::{Error, Result};
use crate::exec::{CommandExecutor, CommandOutput, CommandSpec};
use crate::registry::InstanceRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const UNIT_MODE: u32 = 0o644;

/// Markers in `systemctl` stderr meaning systemd itself is unreachable.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "Failed to connect to bus",
    "System has not been booted with systemd",
    "Failed to get D-Bus connection",
];

/// [`ProcessSupervisor`] driving `systemctl` through the command executor.
pub struct SystemdSupervisor {
    executor: Arc<dyn CommandExecutor>,
    unit_dir: PathBuf,
    mysqld_path: PathBuf,
    timeout: Duration,
}

impl SystemdSupervisor {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        unit_dir: impl Into<PathBuf>,
        mysqld_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            unit_dir: unit_dir.into(),
            mysqld_path: mysqld_path.into(),
            timeout,
        }
    }

    fn unit_path(&self, unit: &str) -> PathBuf {
        self.unit_dir.join(unit)
    }

    async fn systemctl(&self, args: &[&str]) -> Result<CommandOutput> {
        let spec = CommandSpec::new("systemctl")
            .args(args.iter().copied())
            .timeout(self.timeout)
            .privileged();
        let output = match self.executor.run(&spec).await {
            Ok(output) => output,
            Err(Error::Spawn { source, .. }) => {
                return Err(Error::Unavailable(format!("cannot run systemctl: {}", source)))
            }
            Err(e) => return Err(e),
        };
        if UNAVAILABLE_MARKERS
            .iter()
            .any(|m| output.stderr.contains(m))
        {
            return Err(Error::Unavailable(output.stderr.trim().to_string()));
        }
        Ok(output)
    }

    async fn systemctl_checked(&self, args: &[&str]) -> Result<()> {
        let output = self.systemctl(args).await?;
        output.check(&format!("systemctl {}", args.join(" ")))?;
        Ok(())
    }
}

/// Render the unit file for an instance.
pub(crate) fn render_unit(record: &InstanceRecord, mysqld_path: &Path) -> String {
    format!(
        "[Unit]
Description=MySQL Server instance {name} managed by myfleet
After=network.target

[Service]
Type=simple
User=mysql
Group=mysql
ExecStart={mysqld} --defaults-file={config}
ExecStop=/bin/kill -TERM $MAINPID
TimeoutSec=600
Restart=on-failure
LimitNOFILE=65535
PIDFile={pid}

[Install]
WantedBy=multi-user.target
",
        name = record.name,
        mysqld = mysqld_path.display(),
        config = record.config_path.display(),
        pid = record.pid_file.display(),
    )
}

/// Map `systemctl is-active` output to a [`UnitStatus`].
pub(crate) fn parse_is_active(stdout: &str) -> UnitStatus {
    match stdout.trim() {
        "active" => UnitStatus::Running,
        "inactive" | "failed" => UnitStatus::Stopped,
        _ => UnitStatus::Unknown,
    }
}

#[async_trait]
impl ProcessSupervisor for SystemdSupervisor {
    async fn start(&self, unit: &str) -> Result<()> {
        info!("Starting {}", unit);
        self.systemctl_checked(&["start", unit]).await
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        info!("Stopping {}", unit);
        self.systemctl_checked(&["stop", unit]).await
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        info!("Restarting {}", unit);
        self.systemctl_checked(&["restart", unit]).await
    }

    async fn status(&self, unit: &str) -> Result<UnitStatus> {
        // is-active exits non-zero for inactive units; the text is what matters
        let output = self.systemctl(&["is-active", unit]).await?;
        let status = parse_is_active(&output.stdout);
        debug!("{} is {}", unit, status);
        Ok(status)
    }

    async fn install(&self, record: &InstanceRecord) -> Result<()> {
        let path = self.unit_path(&record.service_unit);
        let content = render_unit(record, &self.mysqld_path);
        atomic_write(&path, content.as_bytes(), Some(UNIT_MODE))?;
        self.systemctl_checked(&["daemon-reload"]).await?;
        self.systemctl_checked(&["enable", record.service_unit.as_str()]).await?;
        info!("Installed unit {}", path.display());
        Ok(())
    }

    async fn uninstall(&self, unit: &str) -> Result<()> {
        let output = self.systemctl(&["disable", unit]).await?;
        if !output.success() {
            warn!("systemctl disable {} failed: {}", unit, output.stderr.trim());
        }
        let path = self.unit_path(unit);
        match std::fs::remove_file(&path) {
            Ok(()) => info!("Removed unit {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.systemctl_checked(&["daemon-reload"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstanceLayout, Settings};

    #[test]
    fn is_active_mapping() {
        assert_eq!(parse_is_active("active\n"), UnitStatus::Running);
        assert_eq!(parse_is_active("inactive\n"), UnitStatus::Stopped);
        assert_eq!(parse_is_active("failed\n"), UnitStatus::Stopped);
        assert_eq!(parse_is_active("activating\n"), UnitStatus::Unknown);
    }

    #[test]
    fn unit_points_at_instance_config() {
        let settings = Settings::rooted(Path::new("/srv"));
        let layout = InstanceLayout::for_name(&settings, "prod01").unwrap();
        let record = InstanceRecord::initializing(&layout, 3306, None);
        let unit = render_unit(&record, Path::new("/usr/sbin/mysqld"));
        assert!(unit.contains("ExecStart=/usr/sbin/mysqld --defaults-file=/srv/etc/prod01/my.cnf"));
        assert!(unit.contains("PIDFile=/srv/run/mysql-prod01/mysqld.pid"));
    }
}

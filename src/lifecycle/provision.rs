//! Provisioning and removal.

use super::{require, LifecycleController};
use crate::config::InstanceLayout;
use crate::credential::{hand_to_mysql_user, Credential, InitFile};
use crate::error::{Error, Result};
use crate::exec::CommandSpec;
use crate::package::MysqlVersion;
use crate::registry::{InstanceRecord, LifecycleState};
use crate::supervisor::UnitStatus;
use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DIR_MODE: u32 = 0o750;
const VERSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters of an `init`. Omitted fields are chosen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitRequest {
    pub name: String,
    pub port: Option<u16>,
    pub version: Option<MysqlVersion>,
    /// Ask through `Confirm` whether to start the new instance.
    pub offer_start: bool,
}

impl InitRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: None,
            version: None,
            offer_start: false,
        }
    }

    pub fn offer_start(mut self) -> Self {
        self.offer_start = true;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn version(mut self, version: MysqlVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Whether `record` is what this request would have produced.
    fn matches(&self, record: &InstanceRecord) -> bool {
        self.port.map_or(true, |p| p == record.port)
            && self
                .version
                .map_or(true, |v| Some(v) == record.mysql_version)
    }
}

#[derive(Debug, Clone)]
pub enum InitOutcome {
    Created(InstanceRecord),
    /// An identical instance was already provisioned; nothing was touched.
    AlreadyExists(InstanceRecord),
}

impl InitOutcome {
    pub fn record(&self) -> &InstanceRecord {
        match self {
            InitOutcome::Created(record) | InitOutcome::AlreadyExists(record) => record,
        }
    }

    pub fn created(&self) -> bool {
        matches!(self, InitOutcome::Created(_))
    }
}

impl LifecycleController {
    /// Provision a new instance: `(unprovisioned) → Initializing → Stopped`.
    ///
    /// Every precondition is checked before the filesystem is touched. A
    /// failure after the record exists leaves it `Failed`. With
    /// `offer_start`, a newly created instance is started once confirmed; a
    /// failed start leaves it `Stopped`.
    pub async fn init(&self, request: InitRequest) -> Result<InitOutcome> {
        let offer_start = request.offer_start;
        match self.provision_instance(request).await? {
            InitOutcome::Created(record) if offer_start => {
                if !self.confirm.confirm(&format!("Start '{}' now?", record.name)) {
                    return Ok(InitOutcome::Created(record));
                }
                match self.start(&record.name).await {
                    Ok(started) => Ok(InitOutcome::Created(started)),
                    Err(e) => {
                        warn!("'{}' was provisioned but did not start: {}", record.name, e);
                        Ok(InitOutcome::Created(record))
                    }
                }
            }
            outcome => Ok(outcome),
        }
    }

    async fn provision_instance(&self, request: InitRequest) -> Result<InitOutcome> {
        let layout = InstanceLayout::for_name(&self.settings, &request.name)?;
        let guard = self.registry.lock(&request.name).await?;

        if let Some(existing) = self.registry.find(&request.name)? {
            return existing_outcome(existing, &request);
        }

        let port = match request.port {
            Some(port) => port,
            None => {
                let port = self.suggest_port()?;
                info!("No port requested for '{}', using {}", request.name, port);
                port
            }
        };
        if let Some(holder) = self.registry.port_holder(port, Some(&request.name))? {
            return Err(Error::PortConflict {
                port,
                holder: format!("claimed by instance '{}'", holder.name),
            });
        }
        if self.host.port_in_use(port) {
            return Err(Error::PortConflict {
                port,
                holder: "in use by another process".to_string(),
            });
        }
        if !dir_is_empty(&layout.datadir)? {
            return Err(Error::Precondition(format!(
                "Data directory {} exists and is not empty",
                layout.datadir.display()
            )));
        }

        let mut record = InstanceRecord::initializing(&layout, port, request.version);
        self.registry.create_locked(&guard, &record).await?;

        match self.provision(&layout, &mut record).await {
            Ok(()) => {
                record.credential_applied = true;
                self.transition(&guard, &mut record, LifecycleState::Stopped)?;
                info!(
                    "Provisioned '{}' on port {} (MySQL {})",
                    record.name,
                    record.port,
                    record
                        .mysql_version
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                );
                Ok(InitOutcome::Created(record))
            }
            Err(e) => {
                error!("Provisioning '{}' failed: {}", record.name, e);
                remove_tree(&layout.datadir);
                if let Err(save) = self.transition(&guard, &mut record, LifecycleState::Failed) {
                    warn!("Could not mark '{}' failed: {}", record.name, save);
                }
                Err(e)
            }
        }
    }

    async fn provision(&self, layout: &InstanceLayout, record: &mut InstanceRecord) -> Result<()> {
        for dir in layout.directories() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(DIR_MODE)
                .create(dir)?;
            hand_to_mysql_user(dir);
        }

        let credential = Credential::generate();
        credential.store(&layout.credential_path)?;
        self.parameters.write_initial(layout, record.port)?;
        hand_to_mysql_user(&layout.config_path);

        let init_file = InitFile::write(&credential, &layout.conf_dir)?;
        let spec = CommandSpec::new(self.mysqld.display().to_string())
            .arg(format!("--defaults-file={}", layout.config_path.display()))
            .arg("--initialize-insecure")
            .arg(init_file.arg())
            .arg("--user=mysql")
            .timeout(self.settings.command_timeout())
            .privileged();
        info!("Initializing data directory {}", layout.datadir.display());
        self.executor.run_checked(&spec).await?;
        drop(init_file);

        if record.mysql_version.is_none() {
            record.mysql_version = self.detect_version().await;
        }

        self.supervisor.install(record).await
    }

    /// Version of the installed `mysqld`, if it can be read.
    async fn detect_version(&self) -> Option<MysqlVersion> {
        let spec = CommandSpec::new(self.mysqld.display().to_string())
            .arg("--version")
            .timeout(VERSION_TIMEOUT);
        let banner = match self.executor.run_checked(&spec).await {
            Ok(output) => output.stdout,
            Err(e) => {
                warn!("Could not read the mysqld version: {}", e);
                return None;
            }
        };
        match MysqlVersion::from_server_banner(&banner) {
            Ok(version) => {
                debug!("Detected MySQL {}", version);
                Some(version)
            }
            Err(e) => {
                warn!("Unrecognized mysqld version banner: {}", e);
                None
            }
        }
    }

    /// Tear an instance down: `{Stopped, Running, Failed} → Removing →
    /// (deleted)`. The datadir, logs and backups survive when `keep_data`
    /// is set.
    pub async fn remove(&self, name: &str, keep_data: bool) -> Result<()> {
        let guard = self.registry.lock(name).await?;
        let mut record = self.registry.get(name)?;
        require(
            &record,
            "remove",
            &[
                LifecycleState::Stopped,
                LifecycleState::Running,
                LifecycleState::Failed,
            ],
        )?;

        let description = if keep_data {
            format!(
                "Remove instance '{}'? Its datadir, logs and backups are kept.",
                name
            )
        } else {
            format!(
                "Remove instance '{}' and delete {} and {}?",
                name,
                record.datadir.display(),
                record.backup_dir.display()
            )
        };
        if !self.confirm.confirm(&description) {
            return Err(Error::Aborted);
        }

        self.transition(&guard, &mut record, LifecycleState::Removing)?;
        match self.teardown(&record, keep_data).await {
            Ok(()) => {
                self.registry.delete_locked(&guard)?;
                info!("Removed instance '{}'", name);
                Ok(())
            }
            Err(e) => {
                error!("Removing '{}' failed: {}", name, e);
                if let Err(save) = self.transition(&guard, &mut record, LifecycleState::Failed) {
                    warn!("Could not mark '{}' failed: {}", name, save);
                }
                Err(e)
            }
        }
    }

    async fn teardown(&self, record: &InstanceRecord, keep_data: bool) -> Result<()> {
        let unit = &record.service_unit;
        if self.supervisor.status(unit).await? == UnitStatus::Running {
            self.supervisor.stop(unit).await?;
        }
        self.supervisor.uninstall(unit).await?;

        let mut doomed = vec![record.config_dir(), record.runtime_dir.clone()];
        if keep_data {
            info!(
                "Keeping {}, {} and {}",
                record.datadir.display(),
                record.log_dir.display(),
                record.backup_dir.display()
            );
        } else {
            doomed.push(record.datadir.clone());
            doomed.push(record.log_dir.clone());
            doomed.push(record.backup_dir.clone());
        }
        for dir in doomed {
            match fs::remove_dir_all(&dir) {
                Ok(()) => debug!("Removed {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::Persistence(format!(
                        "Failed to remove {}: {}",
                        dir.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }
}

fn existing_outcome(existing: InstanceRecord, request: &InitRequest) -> Result<InitOutcome> {
    let settled = matches!(
        existing.lifecycle_state,
        LifecycleState::Initializing | LifecycleState::Stopped
    );
    if settled && request.matches(&existing) {
        info!("Instance '{}' already exists", existing.name);
        return Ok(InitOutcome::AlreadyExists(existing));
    }
    if !settled {
        return Err(Error::Conflict(format!(
            "Instance '{}' already exists and is {}",
            existing.name, existing.lifecycle_state
        )));
    }
    Err(Error::Conflict(format!(
        "Instance '{}' already exists with different parameters (port {}, version {})",
        existing.name,
        existing.port,
        existing
            .mysql_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    )))
}

/// A missing directory counts as empty; a non-directory does not.
fn dir_is_empty(path: &Path) -> Result<bool> {
    if path.exists() && !path.is_dir() {
        return Ok(false);
    }
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

fn remove_tree(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

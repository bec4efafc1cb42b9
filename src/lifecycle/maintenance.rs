//! Operations on provisioned instances: configuration, backups, upgrades.

use super::{require, LifecycleController};
use crate::backup::{BackupArtifact, DumpMode, RestoreSummary};
use crate::client::MysqlClient;
use crate::error::{Error, Result};
use crate::package::{MysqlVersion, CONFLICT_PATTERN};
use crate::parameter::{normalize_key, parse_value, ConfigParameter, ParamValue, ParameterReport};
use crate::registry::{InstanceRecord, LifecycleState};
use crate::upgrade::{PlanStatus, UpgradePlan, UpgradeRequest, UpgradeStep};
use std::path::Path;
use tracing::{info, warn};

/// `major.minor` lines the package repositories are known to carry.
pub const SUPPORTED_LINES: &[(u32, u32)] = &[(5, 7), (8, 0), (8, 4)];

/// Result of [`LifecycleController::set_parameter`].
#[derive(Debug, Clone)]
pub struct SetOutcome {
    pub parameter: ConfigParameter,
    pub restarted: bool,
    /// The instance is running with the old value; a restart was declined.
    pub restart_pending: bool,
}

impl LifecycleController {
    /// Write `key=value` into the instance's `[mysqld]` section, then offer
    /// to restart a running instance so the value takes effect.
    pub async fn set_parameter(&self, name: &str, key: &str, value: &str) -> Result<SetOutcome> {
        let guard = self.registry.lock(name).await?;
        let mut record = self.registry.get(name)?;
        require(
            &record,
            "set a parameter on",
            &[
                LifecycleState::Stopped,
                LifecycleState::Running,
                LifecycleState::Failed,
            ],
        )?;

        // A port claim stays under the registry lock until the record is saved
        let claim = if normalize_key(key) == "port" {
            let registry_guard = self.registry.lock_registry().await?;
            let port = self.check_new_port(&record, key, value)?;
            Some((registry_guard, port))
        } else {
            None
        };

        let parameter = self.parameters.set(&record, key, value)?;
        if let Some((_, port)) = &claim {
            record.port = *port;
        }
        self.registry.save_locked(&guard, &mut record)?;
        drop(claim);

        let mut outcome = SetOutcome {
            parameter,
            restarted: false,
            restart_pending: false,
        };
        if record.lifecycle_state != LifecycleState::Running {
            return Ok(outcome);
        }

        let prompt = format!(
            "Restart '{}' now to apply {}={}?",
            name, outcome.parameter.key, outcome.parameter.raw_value
        );
        if self.confirm.confirm(&prompt) {
            self.supervisor.restart(&record.service_unit).await?;
            info!("Restarted '{}' to apply {}", name, outcome.parameter.key);
            outcome.restarted = true;
        } else {
            info!(
                "'{}' keeps running with the previous {} until restarted",
                name, outcome.parameter.key
            );
            outcome.restart_pending = true;
        }
        Ok(outcome)
    }

    /// The port in the record must follow the configuration, so a port change
    /// is held to the same rules as `init`.
    fn check_new_port(&self, record: &InstanceRecord, key: &str, value: &str) -> Result<u16> {
        let port = match parse_value(key, value)? {
            ParamValue::Integer(n) => u16::try_from(n).ok().filter(|p| *p != 0),
            _ => None,
        }
        .ok_or_else(|| Error::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "a TCP port between 1 and 65535".to_string(),
        })?;

        if port == record.port {
            return Ok(port);
        }
        if let Some(holder) = self.registry.port_holder(port, Some(&record.name))? {
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
        Ok(port)
    }

    /// Configured values, compared with the live server when `live` is set.
    pub async fn show_parameters(
        &self,
        name: &str,
        key: Option<&str>,
        live: bool,
    ) -> Result<ParameterReport> {
        let record = self.registry.get(name)?;
        self.parameters.show(&record, key, live).await
    }

    /// Logical backup of a `Running` or `Stopped` instance. A stopped
    /// instance is started for the dump and stopped again.
    pub async fn backup(&self, name: &str, output_dir: Option<&Path>) -> Result<BackupArtifact> {
        let _guard = self.registry.lock(name).await?;
        let record = self.registry.get(name)?;
        require(
            &record,
            "back up",
            &[LifecycleState::Stopped, LifecycleState::Running],
        )?;
        if !record.credential_applied {
            return Err(Error::Precondition(format!(
                "'{}' has no applied credential",
                name
            )));
        }

        if record.lifecycle_state == LifecycleState::Running {
            return self
                .backups
                .backup(&record, output_dir, DumpMode::SingleTransaction)
                .await;
        }

        let unit = &record.service_unit;
        info!("Starting '{}' for the duration of the backup", name);
        self.supervisor.start(unit).await?;
        let result = self.quiesced_backup(&record, output_dir).await;
        match self.supervisor.stop(unit).await {
            Ok(()) => result,
            Err(e) if result.is_ok() => Err(e),
            Err(e) => {
                warn!("Failed to stop '{}' after backup: {}", name, e);
                result
            }
        }
    }

    async fn quiesced_backup(
        &self,
        record: &InstanceRecord,
        output_dir: Option<&Path>,
    ) -> Result<BackupArtifact> {
        let client = MysqlClient::for_record(
            self.executor.clone(),
            record,
            self.settings.command_timeout(),
        )?;
        client
            .wait_until_alive(self.settings.startup_timeout())
            .await?;
        self.backups
            .backup(record, output_dir, DumpMode::Quiesced)
            .await
    }

    /// Complete artifacts under `dir`, or under the instance's backup directory.
    pub fn list_backups(&self, name: &str, dir: Option<&Path>) -> Result<Vec<BackupArtifact>> {
        let record = self.registry.get(name)?;
        self.backups.list(dir.unwrap_or(&record.backup_dir))
    }

    /// Apply a dump to a running instance after operator confirmation.
    pub async fn restore(&self, name: &str, artifact: &Path) -> Result<RestoreSummary> {
        let _guard = self.registry.lock(name).await?;
        let record = self.registry.get(name)?;
        require(&record, "restore", &[LifecycleState::Running])?;

        let prompt = format!(
            "Restore '{}' from {}? Existing data is overwritten and a partial restore is not rolled back.",
            name,
            artifact.display()
        );
        if !self.confirm.confirm(&prompt) {
            return Err(Error::Aborted);
        }
        self.backups.restore(&record, artifact).await
    }

    /// Pre-checks only. Nothing is locked or changed.
    pub async fn plan_upgrade(&self, name: &str, request: UpgradeRequest) -> Result<UpgradePlan> {
        let record = self.registry.get(name)?;
        Ok(self.upgrades.plan(&record, request).await)
    }

    /// Upgrade the server binaries for one instance.
    ///
    /// On success the instance returns to its prior run state with the new
    /// version recorded. On failure it takes whatever state the supervisor
    /// reports after settling, and the version is unchanged.
    pub async fn upgrade(&self, name: &str, request: UpgradeRequest) -> Result<UpgradePlan> {
        let guard = self.registry.lock(name).await?;
        let mut record = self.registry.get(name)?;
        if record.lifecycle_state == LifecycleState::Upgrading {
            return Err(Error::Precondition(format!(
                "'{}' is already being upgraded",
                name
            )));
        }
        require(
            &record,
            "upgrade",
            &[LifecycleState::Stopped, LifecycleState::Running],
        )?;

        let mut plan = self.upgrades.plan(&record, request).await;
        let target = match plan.to {
            Some(target) if plan.passed() => target,
            _ => {
                let details = plan
                    .blocking()
                    .map(|c| format!("{}: {}", c.check, c.outcome.detail()))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(Error::UpgradeFailed {
                    name: name.to_string(),
                    step: UpgradeStep::PreCheck.to_string(),
                    source: Box::new(Error::Precondition(details)),
                });
            }
        };
        for warning in plan.warnings() {
            warn!("{}: {}", warning.check, warning.outcome.detail());
        }

        let prompt = format!(
            "Upgrade '{}' from {} to {}?",
            name,
            plan.from
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            target
        );
        if !self.confirm.confirm(&prompt) {
            return Err(Error::Aborted);
        }

        let prior = record.lifecycle_state;
        self.transition(&guard, &mut record, LifecycleState::Upgrading)?;

        match self.upgrades.execute(&mut plan, &record).await {
            Ok(()) => {
                record.mysql_version = Some(target);
                self.transition(&guard, &mut record, prior)?;
                plan.status = PlanStatus::Committed;
                info!("Upgrade of '{}' to {} committed", name, target);
                Ok(plan)
            }
            Err(e) => {
                let settled = self.upgrades.settle(&record, prior).await;
                if let Err(save) = self.transition(&guard, &mut record, settled) {
                    warn!("Could not persist state of '{}': {}", name, save);
                }
                let step = plan
                    .failed_step
                    .unwrap_or(UpgradeStep::Commit)
                    .to_string();
                Err(Error::UpgradeFailed {
                    name: name.to_string(),
                    step,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Install the newest server package in `line`.
    ///
    /// Installed MariaDB packages block the install. A line outside
    /// [`SUPPORTED_LINES`] needs an extra confirmation.
    pub async fn install(&self, line: &MysqlVersion) -> Result<MysqlVersion> {
        let line = line.to_line();
        let conflicts = self.packages.conflicts(CONFLICT_PATTERN).await?;
        if !conflicts.is_empty() {
            return Err(Error::Precondition(format!(
                "Conflicting packages installed: {}",
                conflicts.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        let supported = SUPPORTED_LINES.contains(&(line.major, line.minor));
        if !supported
            && !self.confirm.confirm(&format!(
                "MySQL {} is not a supported line. Try to install it anyway?",
                line
            ))
        {
            return Err(Error::Aborted);
        }

        let newest = self
            .packages
            .list_available(&line)
            .await?
            .into_iter()
            .max()
            .ok_or_else(|| {
                Error::Precondition(format!("No packages available for MySQL {}", line))
            })?;
        if !self.confirm.confirm(&format!("Install MySQL {}?", newest)) {
            return Err(Error::Aborted);
        }

        self.packages.install(&newest).await?;
        info!("Installed MySQL {}", newest);
        Ok(newest)
    }

    /// Versions in `line` the package source offers, newest first.
    pub async fn list_available(&self, line: &MysqlVersion) -> Result<Vec<MysqlVersion>> {
        self.packages.list_available(&line.to_line()).await
    }
}

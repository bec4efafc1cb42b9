//! In-place server upgrades.
//!
//! `PreCheck → (Backup) → PackageSwap → PostCheck → Commit | Failed`
//!
//! Only the backup is reversible (by an explicit restore). A failed package
//! swap or post-check is reported and left for the operator; there is no
//! automatic downgrade.

mod plan;
mod precheck;

pub use plan::*;
pub use precheck::check_version_path;

use crate::backup::{BackupOrchestrator, DumpMode};
use crate::client::MysqlClient;
use crate::error::{Error, Result};
use crate::exec::CommandExecutor;
use crate::host::HostProbe;
use crate::package::PackageSource;
use crate::registry::{InstanceRecord, LifecycleState};
use crate::supervisor::{ProcessSupervisor, UnitStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct UpgradeOrchestrator {
    executor: Arc<dyn CommandExecutor>,
    supervisor: Arc<dyn ProcessSupervisor>,
    packages: Arc<dyn PackageSource>,
    host: Arc<dyn HostProbe>,
    backups: Arc<BackupOrchestrator>,
    query_timeout: Duration,
    startup_timeout: Duration,
    min_free_bytes: u64,
}

impl UpgradeOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        supervisor: Arc<dyn ProcessSupervisor>,
        packages: Arc<dyn PackageSource>,
        host: Arc<dyn HostProbe>,
        backups: Arc<BackupOrchestrator>,
        query_timeout: Duration,
        startup_timeout: Duration,
        min_free_bytes: u64,
    ) -> Self {
        Self {
            executor,
            supervisor,
            packages,
            host,
            backups,
            query_timeout,
            startup_timeout,
            min_free_bytes,
        }
    }

    /// Run the pre-checks and build a pending plan. Nothing is mutated;
    /// the caller inspects [`UpgradePlan::passed`].
    pub async fn plan(&self, record: &InstanceRecord, request: UpgradeRequest) -> UpgradePlan {
        let (to, checks) = self.run_prechecks(record, &request).await;
        let mut plan = UpgradePlan {
            instance: record.name.clone(),
            from: record.mysql_version,
            to,
            request,
            backup: None,
            checks,
            failed_step: None,
            status: PlanStatus::Pending,
            prior_state: record.lifecycle_state,
        };
        if !plan.passed() {
            plan.fail(UpgradeStep::PreCheck);
        }
        plan
    }

    /// Backup, package swap and post-check for a plan whose pre-checks
    /// passed. On error the plan records the failed step; call
    /// [`settle`](Self::settle) afterwards.
    pub async fn execute(&self, plan: &mut UpgradePlan, record: &InstanceRecord) -> Result<()> {
        let target = match plan.to {
            Some(target) if plan.passed() => target,
            _ => {
                plan.fail(UpgradeStep::PreCheck);
                return Err(Error::Fatal(format!(
                    "Upgrade plan for '{}' executed without passing pre-checks",
                    plan.instance
                )));
            }
        };

        if plan.request.take_backup {
            match self.backup_step(plan, record).await {
                Ok(()) => {}
                Err(e) => {
                    plan.fail(UpgradeStep::Backup);
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.package_swap(record, &target).await {
            plan.fail(UpgradeStep::PackageSwap);
            return Err(e);
        }

        if let Err(e) = self.post_check(plan, record, &target).await {
            plan.fail(UpgradeStep::PostCheck);
            return Err(e);
        }

        info!(
            "Upgrade of '{}' to {} passed post-checks",
            record.name, target
        );
        Ok(())
    }

    async fn backup_step(&self, plan: &mut UpgradePlan, record: &InstanceRecord) -> Result<()> {
        let was_running = plan.prior_state == LifecycleState::Running;
        if !was_running {
            self.supervisor.start(&record.service_unit).await?;
        }

        let mode = if was_running {
            DumpMode::SingleTransaction
        } else {
            DumpMode::Quiesced
        };
        let ready = if was_running {
            Ok(())
        } else {
            self.wait_until_alive(record).await.map(|_| ())
        };
        let result = match ready {
            Ok(()) => {
                self.backups
                    .backup(record, plan.request.backup_dir.as_deref(), mode)
                    .await
            }
            Err(e) => Err(e),
        };

        if !was_running {
            if let Err(e) = self.supervisor.stop(&record.service_unit).await {
                warn!("Failed to stop '{}' after backup: {}", record.name, e);
            }
        }

        let artifact = result?;
        info!("Pre-upgrade backup at {}", artifact.path.display());
        plan.backup = Some(artifact);
        Ok(())
    }

    async fn package_swap(
        &self,
        record: &InstanceRecord,
        target: &crate::package::MysqlVersion,
    ) -> Result<()> {
        if self.supervisor.status(&record.service_unit).await? == UnitStatus::Running {
            self.supervisor.stop(&record.service_unit).await?;
        }
        info!("Swapping packages for '{}' to {}", record.name, target);
        self.packages.install(target).await
    }

    async fn post_check(
        &self,
        plan: &UpgradePlan,
        record: &InstanceRecord,
        target: &crate::package::MysqlVersion,
    ) -> Result<()> {
        self.supervisor.start(&record.service_unit).await?;
        let client = self.wait_until_alive(record).await?;

        if target.needs_mysql_upgrade() {
            client.run_tool("mysql_upgrade", &[]).await?;
        } else {
            client
                .run_tool("mysqlcheck", &["--all-databases", "--check-upgrade"])
                .await?;
        }

        if plan.prior_state == LifecycleState::Stopped {
            self.supervisor.stop(&record.service_unit).await?;
        }
        Ok(())
    }

    async fn wait_until_alive(&self, record: &InstanceRecord) -> Result<MysqlClient> {
        let client = MysqlClient::for_record(self.executor.clone(), record, self.query_timeout)?;
        client.wait_until_alive(self.startup_timeout).await?;
        Ok(client)
    }

    /// After a failure, try to return the unit to its pre-upgrade run state
    /// and report the state the supervisor actually shows.
    pub async fn settle(&self, record: &InstanceRecord, prior: LifecycleState) -> LifecycleState {
        let unit = &record.service_unit;
        let attempt = match prior {
            LifecycleState::Running => self.supervisor.start(unit).await,
            _ => self.supervisor.stop(unit).await,
        };
        if let Err(e) = attempt {
            warn!("Could not restore '{}' to {}: {}", record.name, prior, e);
        }

        match self.supervisor.status(unit).await {
            Ok(UnitStatus::Running) => LifecycleState::Running,
            Ok(UnitStatus::Stopped) => LifecycleState::Stopped,
            Ok(UnitStatus::Unknown) => {
                warn!("Supervisor reports '{}' in an unknown state", record.name);
                LifecycleState::Failed
            }
            Err(e) => {
                warn!("Supervisor unavailable while settling '{}': {}", record.name, e);
                LifecycleState::Failed
            }
        }
    }
}

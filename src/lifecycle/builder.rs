use super::LifecycleController;
use crate::backup::BackupOrchestrator;
use crate::config::Settings;
use crate::confirm::{Confirm, TerminalConfirm};
use crate::error::Result;
use crate::exec::{CommandExecutor, SystemExecutor};
use crate::host::{HostProbe, SystemHost};
use crate::package::{PackageSource, YumPackageSource};
use crate::parameter::ParameterEngine;
use crate::registry::RegistryStore;
use crate::supervisor::{ProcessSupervisor, SystemdSupervisor};
use crate::upgrade::UpgradeOrchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

const FALLBACK_MYSQLD: &str = "/usr/sbin/mysqld";

/// Builder for a [`LifecycleController`].
///
/// Every collaborator defaults to the real host implementation; tests swap
/// in fakes.
///
/// ```no_run
/// use myfleet::{config::Settings, confirm::AssumeYes, LifecycleController};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), myfleet::Error> {
/// let controller = LifecycleController::builder(Settings::load(None)?)
///     .confirm(Arc::new(AssumeYes))
///     .build()?;
/// for record in controller.list()? {
///     println!("{} {}", record.name, record.lifecycle_state);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ControllerBuilder {
    settings: Settings,
    executor: Option<Arc<dyn CommandExecutor>>,
    supervisor: Option<Arc<dyn ProcessSupervisor>>,
    packages: Option<Arc<dyn PackageSource>>,
    host: Option<Arc<dyn HostProbe>>,
    confirm: Option<Arc<dyn Confirm>>,
}

impl ControllerBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            executor: None,
            supervisor: None,
            packages: None,
            host: None,
            confirm: None,
        }
    }

    /// Runs every external command. Also backs the default supervisor and
    /// package source when those are not set.
    pub fn executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn supervisor(mut self, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn packages(mut self, packages: Arc<dyn PackageSource>) -> Self {
        self.packages = Some(packages);
        self
    }

    pub fn host(mut self, host: Arc<dyn HostProbe>) -> Self {
        self.host = Some(host);
        self
    }

    /// How destructive operations ask for approval. Defaults to a terminal
    /// prompt that declines when stdin is not interactive.
    pub fn confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// Resolve the registry directory, open the registry and wire the
    /// collaborators together.
    pub fn build(self) -> Result<LifecycleController> {
        let settings = self.settings;
        let registry_dir = settings.resolve_registry_dir()?;
        let registry = RegistryStore::open(registry_dir, settings.lock_timeout())?;

        let mysqld = resolve_mysqld(&settings);
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SystemExecutor::new(settings.use_sudo)));
        let supervisor = self.supervisor.unwrap_or_else(|| {
            Arc::new(SystemdSupervisor::new(
                executor.clone(),
                settings.unit_dir.clone(),
                mysqld.clone(),
                settings.command_timeout(),
            ))
        });
        let packages = self.packages.unwrap_or_else(|| {
            Arc::new(YumPackageSource::new(
                executor.clone(),
                settings.package_manager.clone(),
                settings.command_timeout(),
            ))
        });
        let host = self.host.unwrap_or_else(|| Arc::new(SystemHost));
        let confirm = self
            .confirm
            .unwrap_or_else(|| Arc::new(TerminalConfirm::default()));

        let parameters = ParameterEngine::new(executor.clone(), settings.command_timeout());
        let backups = Arc::new(BackupOrchestrator::new(
            executor.clone(),
            settings.command_timeout(),
        ));
        let upgrades = UpgradeOrchestrator::new(
            executor.clone(),
            supervisor.clone(),
            packages.clone(),
            host.clone(),
            backups.clone(),
            settings.command_timeout(),
            settings.startup_timeout(),
            settings.min_free_bytes,
        );

        debug!("Using mysqld at {}", mysqld.display());
        Ok(LifecycleController {
            settings,
            registry,
            mysqld,
            executor,
            supervisor,
            packages,
            host,
            confirm,
            parameters,
            backups,
            upgrades,
        })
    }
}

/// Configured path, then `PATH`, then the distribution default.
fn resolve_mysqld(settings: &Settings) -> PathBuf {
    settings
        .mysqld_path
        .clone()
        .or_else(|| which::which("mysqld").ok())
        .unwrap_or_else(|| PathBuf::from(FALLBACK_MYSQLD))
}

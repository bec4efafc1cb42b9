//! Instance lifecycle: the only component that changes `lifecycle_state`.
//!
//! See [`LifecycleState`] for the allowed edges.
//!
//! Every operation holds the instance's registry lock from its first read
//! until the resulting state is persisted.

mod builder;
mod maintenance;
mod provision;

pub use builder::ControllerBuilder;
pub use maintenance::{SetOutcome, SUPPORTED_LINES};
pub use provision::{InitOutcome, InitRequest};

use crate::backup::BackupOrchestrator;
use crate::config::Settings;
use crate::confirm::Confirm;
use crate::error::{Error, Result};
use crate::exec::CommandExecutor;
use crate::host::HostProbe;
use crate::package::PackageSource;
use crate::parameter::ParameterEngine;
use crate::registry::{InstanceLock, InstanceRecord, LifecycleState, RegistryStore};
use crate::supervisor::{ProcessSupervisor, UnitStatus};
use crate::upgrade::UpgradeOrchestrator;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// First port tried by [`LifecycleController::suggest_port`].
pub const BASE_PORT: u16 = 3306;

/// A record next to what the supervisor reports for its unit.
///
/// The two are never reconciled; a mismatch is for the operator to judge.
#[derive(Debug, Clone)]
pub struct InstanceStatus {
    pub record: InstanceRecord,
    pub unit: Option<UnitStatus>,
    /// Why `unit` is missing, when the supervisor could not be asked.
    pub unit_error: Option<String>,
}

impl InstanceStatus {
    /// True when the unit state is known and disagrees with the record.
    pub fn diverged(&self) -> bool {
        match (self.unit, self.record.lifecycle_state) {
            (Some(UnitStatus::Running), LifecycleState::Stopped)
            | (Some(UnitStatus::Stopped), LifecycleState::Running) => true,
            _ => false,
        }
    }
}

pub struct LifecycleController {
    settings: Settings,
    registry: RegistryStore,
    mysqld: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    supervisor: Arc<dyn ProcessSupervisor>,
    packages: Arc<dyn PackageSource>,
    host: Arc<dyn HostProbe>,
    confirm: Arc<dyn Confirm>,
    parameters: ParameterEngine,
    backups: Arc<BackupOrchestrator>,
    upgrades: UpgradeOrchestrator,
}

impl LifecycleController {
    pub fn builder(settings: Settings) -> ControllerBuilder {
        ControllerBuilder::new(settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    /// Close the underlying registry.
    pub fn close(self) {
        self.registry.close();
    }

    pub fn list(&self) -> Result<Vec<InstanceRecord>> {
        self.registry.list()
    }

    pub fn get(&self, name: &str) -> Result<InstanceRecord> {
        self.registry.get(name)
    }

    pub async fn status(&self, name: &str) -> Result<InstanceStatus> {
        let record = self.registry.get(name)?;
        let (unit, unit_error) = match self.supervisor.status(&record.service_unit).await {
            Ok(status) => (Some(status), None),
            Err(e) => {
                debug!("No unit status for '{}': {}", name, e);
                (None, Some(e.to_string()))
            }
        };
        Ok(InstanceStatus {
            record,
            unit,
            unit_error,
        })
    }

    /// First port at or above [`BASE_PORT`] that no record claims and no
    /// listener holds.
    pub fn suggest_port(&self) -> Result<u16> {
        let claimed: BTreeSet<u16> = self
            .registry
            .list()?
            .iter()
            .filter(|r| r.claims_port(r.port))
            .map(|r| r.port)
            .collect();
        (BASE_PORT..=u16::MAX)
            .find(|port| !claimed.contains(port) && !self.host.port_in_use(*port))
            .ok_or_else(|| {
                Error::Precondition(format!("No free port at or above {}", BASE_PORT))
            })
    }

    /// `Stopped → Running`. Starting a running instance is a no-op.
    pub async fn start(&self, name: &str) -> Result<InstanceRecord> {
        let guard = self.registry.lock(name).await?;
        let mut record = self.registry.get(name)?;
        match record.lifecycle_state {
            LifecycleState::Running => {
                info!("'{}' is already running", name);
                return Ok(record);
            }
            LifecycleState::Stopped => {}
            _ => return Err(invalid_transition(&record, "start")),
        }

        self.supervisor.start(&record.service_unit).await?;
        self.transition(&guard, &mut record, LifecycleState::Running)?;
        Ok(record)
    }

    /// `Running → Stopped`. Stopping a stopped instance is a no-op.
    pub async fn stop(&self, name: &str) -> Result<InstanceRecord> {
        let guard = self.registry.lock(name).await?;
        let mut record = self.registry.get(name)?;
        match record.lifecycle_state {
            LifecycleState::Stopped => {
                info!("'{}' is already stopped", name);
                return Ok(record);
            }
            LifecycleState::Running => {}
            _ => return Err(invalid_transition(&record, "stop")),
        }

        self.supervisor.stop(&record.service_unit).await?;
        self.transition(&guard, &mut record, LifecycleState::Stopped)?;
        Ok(record)
    }

    /// `Running → Running`.
    pub async fn restart(&self, name: &str) -> Result<InstanceRecord> {
        let guard = self.registry.lock(name).await?;
        let mut record = self.registry.get(name)?;
        require(&record, "restart", &[LifecycleState::Running])?;
        self.supervisor.restart(&record.service_unit).await?;
        self.transition(&guard, &mut record, LifecycleState::Running)?;
        Ok(record)
    }

    /// Persist a state change. An edge outside the state machine is an
    /// internal error, never written.
    fn transition(
        &self,
        guard: &InstanceLock,
        record: &mut InstanceRecord,
        to: LifecycleState,
    ) -> Result<()> {
        let from = record.lifecycle_state;
        if !from.is_valid_transition(to) {
            return Err(Error::Fatal(format!(
                "Illegal transition {} -> {} for '{}'",
                from, to, record.name
            )));
        }
        record.lifecycle_state = to;
        self.registry.save_locked(guard, record)?;
        if from != to {
            info!("'{}': {} -> {}", record.name, from, to);
        }
        Ok(())
    }
}

fn invalid_transition(record: &InstanceRecord, operation: &str) -> Error {
    Error::InvalidTransition {
        name: record.name.clone(),
        operation: operation.to_string(),
        state: record.lifecycle_state.to_string(),
    }
}

/// Fail with `InvalidTransition` unless the record is in one of `allowed`.
fn require(record: &InstanceRecord, operation: &str, allowed: &[LifecycleState]) -> Result<()> {
    if allowed.contains(&record.lifecycle_state) {
        Ok(())
    } else {
        Err(invalid_transition(record, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_lists_allowed_states() {
        let settings = Settings::rooted(std::path::Path::new("/srv"));
        let layout = crate::config::InstanceLayout::for_name(&settings, "prod01").unwrap();
        let mut record = InstanceRecord::initializing(&layout, 3306, None);

        let err = require(&record, "start", &[LifecycleState::Stopped]).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { ref state, .. } if state == "initializing"));

        record.lifecycle_state = LifecycleState::Stopped;
        assert!(require(&record, "start", &[LifecycleState::Stopped]).is_ok());
    }

    #[test]
    fn divergence_only_for_definite_mismatch() {
        let settings = Settings::rooted(std::path::Path::new("/srv"));
        let layout = crate::config::InstanceLayout::for_name(&settings, "prod01").unwrap();
        let mut record = InstanceRecord::initializing(&layout, 3306, None);
        record.lifecycle_state = LifecycleState::Running;

        let status = |unit| InstanceStatus {
            record: record.clone(),
            unit,
            unit_error: None,
        };
        assert!(status(Some(UnitStatus::Stopped)).diverged());
        assert!(!status(Some(UnitStatus::Running)).diverged());
        assert!(!status(None).diverged());
    }
}

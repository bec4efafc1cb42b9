//! Service-unit control for instances.
//!
//! The lifecycle code only talks to [`ProcessSupervisor`]; the production
//! implementation is [`SystemdSupervisor`].

mod systemd;

pub use systemd::SystemdSupervisor;

use crate::error::Result;
use crate::registry::InstanceRecord;
use async_trait::async_trait;
use std::fmt;

/// What the supervisor reports for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Running,
    Stopped,
    /// Transitional or unrecognized (activating, reloading, ...).
    Unknown,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Running => write!(f, "running"),
            UnitStatus::Stopped => write!(f, "stopped"),
            UnitStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Start/stop/status of an instance's service unit.
///
/// Every method fails with `Error::Unavailable` when the supervisor itself
/// cannot be reached.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn start(&self, unit: &str) -> Result<()>;
    async fn stop(&self, unit: &str) -> Result<()>;
    async fn restart(&self, unit: &str) -> Result<()>;
    async fn status(&self, unit: &str) -> Result<UnitStatus>;
    /// Write and enable the unit for `record`.
    async fn install(&self, record: &InstanceRecord) -> Result<()>;
    /// Disable and delete the unit. Missing units are not an error.
    async fn uninstall(&self, unit: &str) -> Result<()>;
}

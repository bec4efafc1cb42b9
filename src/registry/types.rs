use crate::config::InstanceLayout;
use crate::package::MysqlVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of a registered instance.
///
/// "Unprovisioned" is the absence of a record and has no variant.
///
/// ```text
/// Initializing ──► Stopped ◄──► Running
///      │             │  ▲          │
///      │             ▼  │          ▼
///      │           Upgrading ◄─────┘
///      ▼             │
///    Failed ◄────────┘
///      │
///      ▼
///   Removing (record deleted on success)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Initializing,
    Stopped,
    Running,
    Upgrading,
    Removing,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Initializing => write!(f, "initializing"),
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Upgrading => write!(f, "upgrading"),
            LifecycleState::Removing => write!(f, "removing"),
            LifecycleState::Failed => write!(f, "failed"),
        }
    }
}

impl LifecycleState {
    /// Check if a transition is allowed by the lifecycle state machine.
    ///
    /// ```
    /// use myfleet::registry::LifecycleState;
    ///
    /// assert!(LifecycleState::Stopped.is_valid_transition(LifecycleState::Running));
    /// assert!(!LifecycleState::Initializing.is_valid_transition(LifecycleState::Running));
    /// ```
    pub fn is_valid_transition(&self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, to) {
            (Initializing, Stopped) | (Initializing, Failed) => true,

            (Stopped, Running) | (Stopped, Upgrading) | (Stopped, Removing) => true,

            // restart stays Running
            (Running, Running) | (Running, Stopped) => true,
            (Running, Upgrading) | (Running, Removing) => true,

            (Upgrading, Stopped) | (Upgrading, Running) | (Upgrading, Failed) => true,

            (Removing, Failed) => true,

            (Failed, Removing) => true,

            _ => false,
        }
    }

    /// States that only exist while an operation is in flight. A record left
    /// in one of these after a crash needs manual inspection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LifecycleState::Initializing | LifecycleState::Upgrading | LifecycleState::Removing
        )
    }

    /// Failed instances release their port.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Failed)
    }
}

/// Persisted identity and configuration of one managed server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub name: String,
    pub port: u16,
    pub socket: PathBuf,
    pub datadir: PathBuf,
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    pub error_log: PathBuf,
    pub slow_log: PathBuf,
    pub pid_file: PathBuf,
    pub runtime_dir: PathBuf,
    pub backup_dir: PathBuf,
    #[serde(default)]
    pub mysql_version: Option<MysqlVersion>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub service_unit: String,
    pub credential_path: PathBuf,
    #[serde(default)]
    pub credential_applied: bool,
    pub lifecycle_state: LifecycleState,
}

impl InstanceRecord {
    /// A fresh record in `Initializing` built from the instance layout.
    pub fn initializing(
        layout: &InstanceLayout,
        port: u16,
        mysql_version: Option<MysqlVersion>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: layout.name.clone(),
            port,
            socket: layout.socket.clone(),
            datadir: layout.datadir.clone(),
            config_path: layout.config_path.clone(),
            log_dir: layout.log_dir.clone(),
            error_log: layout.error_log.clone(),
            slow_log: layout.slow_log.clone(),
            pid_file: layout.pid_file.clone(),
            runtime_dir: layout.runtime_dir.clone(),
            backup_dir: layout.backup_dir.clone(),
            mysql_version,
            created_at: now,
            last_modified: now,
            service_unit: layout.service_unit.clone(),
            credential_path: layout.credential_path.clone(),
            credential_applied: false,
            lifecycle_state: LifecycleState::Initializing,
        }
    }

    /// Directory holding `my.cnf` and the credential file.
    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default()
    }

    /// True when this record holds its port (every state except `Failed`).
    pub fn claims_port(&self, port: u16) -> bool {
        self.port == port && !self.lifecycle_state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn guarded_transitions() {
        assert!(Stopped.is_valid_transition(Running));
        assert!(Running.is_valid_transition(Stopped));
        assert!(Running.is_valid_transition(Running));
        assert!(Upgrading.is_valid_transition(Failed));
        assert!(Failed.is_valid_transition(Removing));

        assert!(!Initializing.is_valid_transition(Running));
        assert!(!Failed.is_valid_transition(Running));
        assert!(!Removing.is_valid_transition(Stopped));
        assert!(!Failed.is_valid_transition(Upgrading));

        // restart is the only self-transition
        for state in [Initializing, Stopped, Upgrading, Removing, Failed] {
            assert!(!state.is_valid_transition(state), "{} -> {}", state, state);
        }
    }

    #[test]
    fn state_serializes_lowercase() {
        let yaml = serde_yaml::to_string(&Upgrading).unwrap();
        assert_eq!(yaml.trim(), "upgrading");
    }

    #[test]
    fn failed_records_release_their_port() {
        let settings = crate::config::Settings::rooted(std::path::Path::new("/srv"));
        let layout = InstanceLayout::for_name(&settings, "prod01").unwrap();
        let mut record = InstanceRecord::initializing(&layout, 3306, None);
        assert!(record.claims_port(3306));
        record.lifecycle_state = Failed;
        assert!(!record.claims_port(3306));
    }
}

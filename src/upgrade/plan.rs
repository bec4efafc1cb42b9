use crate::backup::BackupArtifact;
use crate::package::MysqlVersion;
use crate::registry::LifecycleState;
use std::fmt;
use std::path::PathBuf;

/// Operator input for one upgrade.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// `major.minor` (newest patch wins) or an exact `major.minor.patch`.
    pub target: MysqlVersion,
    pub take_backup: bool,
    pub allow_cross_major: bool,
    /// Backup root override; defaults to the instance's backup directory.
    pub backup_dir: Option<PathBuf>,
}

impl UpgradeRequest {
    pub fn new(target: MysqlVersion) -> Self {
        Self {
            target,
            take_backup: true,
            allow_cross_major: false,
            backup_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStep {
    PreCheck,
    Backup,
    PackageSwap,
    PostCheck,
    Commit,
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeStep::PreCheck => write!(f, "pre-check"),
            UpgradeStep::Backup => write!(f, "backup"),
            UpgradeStep::PackageSwap => write!(f, "package-swap"),
            UpgradeStep::PostCheck => write!(f, "post-check"),
            UpgradeStep::Commit => write!(f, "commit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Pending,
    Committed,
    Failed,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStatus::Pending => write!(f, "pending"),
            PlanStatus::Committed => write!(f, "committed"),
            PlanStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed(String),
    /// Advisory; never blocks.
    Warning(String),
    /// Blocks the upgrade before anything is touched.
    Failed(String),
    Skipped(String),
}

impl CheckOutcome {
    pub fn is_blocking(&self) -> bool {
        matches!(self, CheckOutcome::Failed(_))
    }

    pub fn detail(&self) -> &str {
        match self {
            CheckOutcome::Passed(d)
            | CheckOutcome::Warning(d)
            | CheckOutcome::Failed(d)
            | CheckOutcome::Skipped(d) => d,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreCheckResult {
    pub check: &'static str,
    pub outcome: CheckOutcome,
}

/// One upgrade in flight. Only its outcome outlives the operation.
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub instance: String,
    pub from: Option<MysqlVersion>,
    /// Resolved target; `None` only when resolution failed.
    pub to: Option<MysqlVersion>,
    pub request: UpgradeRequest,
    pub backup: Option<BackupArtifact>,
    pub checks: Vec<PreCheckResult>,
    pub failed_step: Option<UpgradeStep>,
    pub status: PlanStatus,
    /// Run state before the upgrade; restored on success.
    pub prior_state: LifecycleState,
}

impl UpgradePlan {
    pub fn blocking(&self) -> impl Iterator<Item = &PreCheckResult> {
        self.checks.iter().filter(|c| c.outcome.is_blocking())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &PreCheckResult> {
        self.checks
            .iter()
            .filter(|c| matches!(c.outcome, CheckOutcome::Warning(_)))
    }

    pub fn passed(&self) -> bool {
        self.blocking().next().is_none()
    }

    pub fn fail(&mut self, step: UpgradeStep) {
        self.failed_step = Some(step);
        self.status = PlanStatus::Failed;
    }
}

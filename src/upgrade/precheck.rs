//! Non-destructive checks run before any package is touched.

use super::{CheckOutcome, PreCheckResult, UpgradeOrchestrator, UpgradeRequest};
use crate::client::MysqlClient;
use crate::package::{MysqlVersion, CONFLICT_PATTERN};
use crate::registry::{InstanceRecord, LifecycleState};
use tracing::debug;

const ACTIVE_SESSIONS_SQL: &str = "SELECT COUNT(*) FROM information_schema.PROCESSLIST \
     WHERE COMMAND NOT IN ('Sleep', 'Daemon', 'Binlog Dump') AND ID <> CONNECTION_ID();";

fn result(check: &'static str, outcome: CheckOutcome) -> PreCheckResult {
    debug!("Pre-check {}: {:?}", check, outcome);
    PreCheckResult { check, outcome }
}

/// Decide whether `installed → target` is an allowed upgrade path.
pub fn check_version_path(
    installed: Option<MysqlVersion>,
    target: MysqlVersion,
    allow_cross_major: bool,
) -> CheckOutcome {
    let Some(installed) = installed else {
        return CheckOutcome::Failed(
            "installed version is unknown; record it before upgrading".to_string(),
        );
    };
    if target <= installed {
        return CheckOutcome::Failed(format!(
            "target {} is not newer than installed {}",
            target, installed
        ));
    }
    if target.major != installed.major && !allow_cross_major {
        return CheckOutcome::Failed(format!(
            "{} -> {} crosses a major version; pass --allow-cross-major to proceed",
            installed, target
        ));
    }
    CheckOutcome::Passed(format!("{} -> {}", installed, target))
}

impl UpgradeOrchestrator {
    /// Pick the concrete version for `target`.
    pub(super) async fn resolve_target(
        &self,
        target: &MysqlVersion,
    ) -> (Option<MysqlVersion>, PreCheckResult) {
        let available = match self.packages.list_available(&target.to_line()).await {
            Ok(available) => available,
            Err(e) => {
                return (
                    None,
                    result(
                        "target-version",
                        CheckOutcome::Failed(format!("cannot list available versions: {}", e)),
                    ),
                )
            }
        };

        let resolved = if target.is_line() {
            available.iter().max().copied()
        } else {
            available.iter().find(|v| *v == target).copied()
        };

        match resolved {
            Some(version) => (
                Some(version),
                result(
                    "target-version",
                    CheckOutcome::Passed(format!("{} resolves to {}", target, version)),
                ),
            ),
            None => (
                None,
                result(
                    "target-version",
                    CheckOutcome::Failed(format!("{} is not available from the repository", target)),
                ),
            ),
        }
    }

    /// Run every pre-check. Never mutates anything.
    pub(super) async fn run_prechecks(
        &self,
        record: &InstanceRecord,
        request: &UpgradeRequest,
    ) -> (Option<MysqlVersion>, Vec<PreCheckResult>) {
        let mut checks = Vec::new();

        let (resolved, resolution) = self.resolve_target(&request.target).await;
        checks.push(resolution);
        if let Some(target) = resolved {
            checks.push(result(
                "version-path",
                check_version_path(record.mysql_version, target, request.allow_cross_major),
            ));
        }

        checks.push(self.check_conflicts().await);
        checks.extend(self.check_server_activity(record).await);

        if request.take_backup {
            checks.push(self.check_disk_space(record, request));
        }

        (resolved, checks)
    }

    async fn check_conflicts(&self) -> PreCheckResult {
        let outcome = match self.packages.conflicts(CONFLICT_PATTERN).await {
            Ok(found) if found.is_empty() => {
                CheckOutcome::Passed("no conflicting packages".to_string())
            }
            Ok(found) => CheckOutcome::Failed(format!(
                "conflicting packages installed: {}",
                found.into_iter().collect::<Vec<_>>().join(", ")
            )),
            Err(e) => CheckOutcome::Failed(format!("cannot query installed packages: {}", e)),
        };
        result("package-conflicts", outcome)
    }

    /// Advisory: active sessions and replication. Requires a running server
    /// with an applied credential.
    async fn check_server_activity(&self, record: &InstanceRecord) -> Vec<PreCheckResult> {
        if record.lifecycle_state != LifecycleState::Running || !record.credential_applied {
            let reason = format!("instance is {} or has no applied credential", record.lifecycle_state);
            return vec![
                result("active-sessions", CheckOutcome::Skipped(reason.clone())),
                result("replication", CheckOutcome::Skipped(reason)),
            ];
        }

        let client = match MysqlClient::for_record(self.executor.clone(), record, self.query_timeout) {
            Ok(client) => client,
            Err(e) => {
                let reason = format!("cannot connect: {}", e);
                return vec![
                    result("active-sessions", CheckOutcome::Warning(reason.clone())),
                    result("replication", CheckOutcome::Warning(reason)),
                ];
            }
        };

        let sessions = match client.count(ACTIVE_SESSIONS_SQL).await {
            Ok(0) => CheckOutcome::Passed("no active client sessions".to_string()),
            Ok(n) => CheckOutcome::Warning(format!(
                "{} active client session(s) will be disconnected",
                n
            )),
            Err(e) => CheckOutcome::Warning(format!("could not count sessions: {}", e)),
        };

        let replica_sql = match record.mysql_version {
            Some(v) if v < MysqlVersion::new(8, 0, 22) => "SHOW SLAVE STATUS;",
            _ => "SHOW REPLICA STATUS;",
        };
        let replication = match client.query(replica_sql).await {
            Ok(rows) if rows.is_empty() => CheckOutcome::Passed("not a replica".to_string()),
            Ok(_) => CheckOutcome::Warning(
                "instance is a replica; replication stops during the upgrade".to_string(),
            ),
            Err(e) => CheckOutcome::Warning(format!("could not read replication status: {}", e)),
        };

        vec![
            result("active-sessions", sessions),
            result("replication", replication),
        ]
    }

    fn check_disk_space(&self, record: &InstanceRecord, request: &UpgradeRequest) -> PreCheckResult {
        let root = request.backup_dir.as_deref().unwrap_or(&record.backup_dir);
        let outcome = match self.host.free_bytes(root) {
            Ok(free) if free >= self.min_free_bytes => {
                CheckOutcome::Passed(format!("{} bytes free on {}", free, root.display()))
            }
            Ok(free) => CheckOutcome::Failed(format!(
                "only {} bytes free on {}; at least {} required for the backup",
                free,
                root.display(),
                self.min_free_bytes
            )),
            Err(e) => CheckOutcome::Failed(format!("cannot measure free space: {}", e)),
        };
        result("disk-space", outcome)
    }
}

//! Logical backups and restores.
//!
//! A backup is dumped into a hidden `.staging-<timestamp>` directory and only
//! renamed to `<root>/<timestamp>` after the dump finished, its trailer was
//! found and its checksum landed in a `complete` manifest. Readers never see
//! a partial artifact.

mod artifact;

pub use artifact::{
    has_dump_trailer, sha256_file, ArtifactStatus, BackupArtifact, DumpMode, DUMP_TRAILER,
    MANIFEST_FILE,
};

use crate::atomic::{fsync_dir, fsync_file};
use crate::client::MysqlClient;
use crate::error::{Error, RestorePhase, Result};
use crate::exec::CommandExecutor;
use crate::registry::InstanceRecord;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STAGING_PREFIX: &str = ".staging-";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Removes the staging directory unless the artifact was promoted.
struct Staging {
    path: PathBuf,
    promoted: bool,
}

impl Drop for Staging {
    fn drop(&mut self) {
        if self.promoted {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(
                "Failed to remove staging directory {}: {}",
                self.path.display(),
                e
            );
        } else {
            debug!("Removed staging directory {}", self.path.display());
        }
    }
}

/// What a restore applied.
#[derive(Debug, Clone)]
pub struct RestoreSummary {
    pub dump_path: PathBuf,
    /// False when restoring a bare dump file without a manifest.
    pub checksum_verified: bool,
}

pub struct BackupOrchestrator {
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl BackupOrchestrator {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    /// Dump a running server into a new artifact under `output_dir` (or the
    /// record's backup directory).
    pub async fn backup(
        &self,
        record: &InstanceRecord,
        output_dir: Option<&Path>,
        mode: DumpMode,
    ) -> Result<BackupArtifact> {
        let root = output_dir.unwrap_or(&record.backup_dir);
        fs::create_dir_all(root)?;

        let now = Utc::now();
        let stamp = now.format(TIMESTAMP_FORMAT).to_string();
        let mut staging = Staging {
            path: unique_dir(root, &format!("{}{}", STAGING_PREFIX, stamp)),
            promoted: false,
        };
        fs::create_dir(&staging.path)?;

        let dump_file = format!("{}-{}.sql", record.name, stamp);
        let dump_path = staging.path.join(&dump_file);
        info!(
            "Backing up '{}' to {} ({:?})",
            record.name,
            root.display(),
            mode
        );

        let client = MysqlClient::for_record(self.executor.clone(), record, self.timeout)?;
        let output = client
            .dump(&dump_path, mode == DumpMode::SingleTransaction)
            .await?;
        output.check("mysqldump")?;

        if !has_dump_trailer(&dump_path)? {
            return Err(Error::external(
                "mysqldump",
                Some(0),
                "dump is missing its completion trailer",
            ));
        }

        fsync_file(&dump_path)?;
        let (sha256, size_bytes) = sha256_file(&dump_path)?;
        let mut artifact = BackupArtifact {
            instance: record.name.clone(),
            timestamp: now,
            path: staging.path.clone(),
            dump_file,
            sha256,
            size_bytes,
            status: ArtifactStatus::Complete,
            mode,
            mysql_version: record.mysql_version,
        };
        artifact.store(&staging.path)?;

        let final_dir = unique_dir(root, &stamp);
        fs::rename(&staging.path, &final_dir).map_err(|e| {
            Error::Persistence(format!(
                "Failed to promote {} to {}: {}",
                staging.path.display(),
                final_dir.display(),
                e
            ))
        })?;
        staging.promoted = true;
        fsync_dir(root)?;

        artifact.path = final_dir;
        info!(
            "Backup of '{}' complete: {} ({} bytes, sha256 {})",
            record.name,
            artifact.path.display(),
            artifact.size_bytes,
            artifact.sha256
        );
        Ok(artifact)
    }

    /// Complete artifacts under `root`, oldest first. Staging directories,
    /// pending manifests and artifacts whose dump is gone or
    /// truncated are skipped.
    pub fn list(&self, root: &Path) -> Result<Vec<BackupArtifact>> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'));
            if hidden || !path.is_dir() || !path.join(MANIFEST_FILE).exists() {
                continue;
            }
            match BackupArtifact::load(&path) {
                Ok(artifact) if artifact.is_complete() && artifact.dump_intact() => {
                    artifacts.push(artifact)
                }
                Ok(_) => debug!("Skipping incomplete artifact {}", path.display()),
                Err(e) => warn!("Skipping unreadable manifest in {}: {}", path.display(), e),
            }
        }
        artifacts.sort_by_key(|a| a.timestamp);
        Ok(artifacts)
    }

    /// Stream a dump into a running server.
    ///
    /// `artifact_path` is an artifact directory or a dump file. A manifest,
    /// when present, is checksum-verified before anything is sent.
    pub async fn restore(
        &self,
        record: &InstanceRecord,
        artifact_path: &Path,
    ) -> Result<RestoreSummary> {
        let before = |detail: String| Error::RestoreFailed {
            phase: RestorePhase::BeforeExecution,
            detail,
        };

        let (dump_path, manifest) = resolve_artifact(artifact_path).map_err(|e| before(e.to_string()))?;
        if let Some(manifest) = &manifest {
            if !manifest.is_complete() {
                return Err(before(format!(
                    "artifact {} is not complete",
                    manifest.path.display()
                )));
            }
            manifest.verify().map_err(|e| before(e.to_string()))?;
            debug!("Checksum verified for {}", dump_path.display());
        }

        let client = MysqlClient::for_record(self.executor.clone(), record, self.timeout)
            .map_err(|e| before(e.to_string()))?;
        info!("Restoring '{}' from {}", record.name, dump_path.display());
        let output = client
            .execute_file(&dump_path)
            .await
            .map_err(|e| before(e.to_string()))?;

        if !output.success() {
            let stderr = crate::error::stderr_excerpt(&output.stderr);
            return Err(Error::RestoreFailed {
                phase: classify_restore_failure(&stderr),
                detail: stderr,
            });
        }

        info!("Restore of '{}' complete", record.name);
        Ok(RestoreSummary {
            dump_path,
            checksum_verified: manifest.is_some(),
        })
    }
}

/// `ERROR 1064 (42000) at line 17: ...` means statements already ran.
pub fn classify_restore_failure(stderr: &str) -> RestorePhase {
    if stderr.contains(" at line ") {
        RestorePhase::DuringExecution
    } else {
        RestorePhase::BeforeExecution
    }
}

fn resolve_artifact(path: &Path) -> Result<(PathBuf, Option<BackupArtifact>)> {
    if path.is_dir() {
        if path.join(MANIFEST_FILE).exists() {
            let manifest = BackupArtifact::load(path)?;
            let dump = manifest.dump_path();
            if !dump.is_file() {
                return Err(Error::NotFound(dump.display().to_string()));
            }
            return Ok((dump, Some(manifest)));
        }
        let mut dumps: Vec<PathBuf> = fs::read_dir(path)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("sql"))
            .collect();
        return match dumps.len() {
            1 => Ok((dumps.remove(0), None)),
            0 => Err(Error::Validation(format!(
                "No .sql dump in {}",
                path.display()
            ))),
            _ => Err(Error::Validation(format!(
                "Several dumps in {}; pass the file itself",
                path.display()
            ))),
        };
    }

    if !path.is_file() {
        return Err(Error::Validation(format!(
            "Backup {} does not exist",
            path.display()
        )));
    }

    // A dump inside an artifact directory is still covered by its manifest
    let manifest = path
        .parent()
        .filter(|dir| dir.join(MANIFEST_FILE).exists())
        .and_then(|dir| BackupArtifact::load(dir).ok())
        .filter(|m| m.dump_path() == path);
    Ok((path.to_path_buf(), manifest))
}

/// `root/base`, or `root/base-1`, `root/base-2`, ... if taken.
fn unique_dir(root: &Path, base: &str) -> PathBuf {
    let candidate = root.join(base);
    if !candidate.exists() {
        return candidate;
    }
    (1u32..)
        .map(|n| root.join(format!("{}-{}", base, n)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_phase_from_client_stderr() {
        assert_eq!(
            classify_restore_failure("ERROR 1064 (42000) at line 17: You have an error"),
            RestorePhase::DuringExecution
        );
        assert_eq!(
            classify_restore_failure("ERROR 2002 (HY000): Can't connect through socket"),
            RestorePhase::BeforeExecution
        );
    }

    #[test]
    fn unique_dir_adds_counter() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("20240101-000000")).unwrap();
        fs::create_dir(dir.path().join("20240101-000000-1")).unwrap();
        assert_eq!(
            unique_dir(dir.path(), "20240101-000000"),
            dir.path().join("20240101-000000-2")
        );
    }

    #[test]
    fn list_ignores_staging_and_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = BackupOrchestrator::new(
            Arc::new(crate::exec::SystemExecutor::new(false)),
            Duration::from_secs(1),
        );
        assert!(orchestrator.list(&dir.path().join("none")).unwrap().is_empty());

        fs::create_dir(dir.path().join(".staging-20240101-000000")).unwrap();
        assert!(orchestrator.list(dir.path()).unwrap().is_empty());
    }
}

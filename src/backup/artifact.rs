use crate::atomic::atomic_write;
use crate::error::{Error, Result};
use crate::package::MysqlVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "artifact.json";

/// mysqldump's last line on a clean finish.
pub const DUMP_TRAILER: &str = "-- Dump completed";

const TRAILER_WINDOW: u64 = 4096;
const MANIFEST_MODE: u32 = 0o640;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Pending,
    Complete,
}

/// How the dump was made consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DumpMode {
    /// `--single-transaction` against a serving instance.
    SingleTransaction,
    /// Taken from a server started only for the dump.
    Quiesced,
}

/// Manifest of one backup, stored as `artifact.json` beside the dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub instance: String,
    pub timestamp: DateTime<Utc>,
    /// Artifact directory; derived from where the manifest was read.
    #[serde(skip)]
    pub path: PathBuf,
    /// Dump file name inside `path`.
    pub dump_file: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub status: ArtifactStatus,
    pub mode: DumpMode,
    #[serde(default)]
    pub mysql_version: Option<MysqlVersion>,
}

impl BackupArtifact {
    pub fn dump_path(&self) -> PathBuf {
        self.path.join(&self.dump_file)
    }

    pub fn is_complete(&self) -> bool {
        self.status == ArtifactStatus::Complete
    }

    /// The dump exists and has the size the manifest recorded.
    pub fn dump_intact(&self) -> bool {
        fs::metadata(self.dump_path())
            .map(|m| m.is_file() && m.len() == self.size_bytes)
            .unwrap_or(false)
    }

    /// Read `artifact.json` from an artifact directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let content = fs::read_to_string(dir.join(MANIFEST_FILE))?;
        let mut artifact: BackupArtifact = serde_json::from_str(&content)?;
        artifact.path = dir.to_path_buf();
        Ok(artifact)
    }

    /// Durably write the manifest into `dir`.
    pub fn store(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        atomic_write(&dir.join(MANIFEST_FILE), json.as_bytes(), Some(MANIFEST_MODE))
    }

    /// Recompute the dump checksum and compare with the manifest.
    pub fn verify(&self) -> Result<()> {
        let (actual, _) = sha256_file(&self.dump_path())?;
        if actual != self.sha256 {
            return Err(Error::Precondition(format!(
                "Checksum mismatch for {}: manifest {}, file {}",
                self.dump_path().display(),
                self.sha256,
                actual
            )));
        }
        Ok(())
    }
}

/// Hex SHA-256 and size of a file, streamed.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

/// True if the tail of `path` carries mysqldump's completion trailer.
pub fn has_dump_trailer(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(TRAILER_WINDOW)))?;
    let mut tail = Vec::new();
    file.read_to_end(&mut tail)?;
    Ok(String::from_utf8_lossy(&tail)
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|l| l.starts_with(DUMP_TRAILER)))
}

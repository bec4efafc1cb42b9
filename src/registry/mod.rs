//! Durable, lock-protected storage of one YAML record per instance.
//!
//! Layout of the registry directory:
//!
//! ```text
//! <registry_dir>/
//!   prod01.yaml
//!   prod02.yaml
//!   .locks/
//!     .registry.lock
//!     prod01.lock
//!     prod02.lock
//! ```
//!
//! Every mutation holds the instance's advisory lock from before the read
//! until after the new record is durably renamed into place.

mod lock;
mod types;

pub use lock::InstanceLock;
pub use types::*;

use crate::atomic::atomic_write;
use crate::config::validate_name;
use crate::error::{Error, Result};
use chrono::Utc;
use lock::REGISTRY_LOCK_NAME;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const LOCK_DIR: &str = ".locks";
const RECORD_MODE: u32 = 0o640;

/// Registry of instance records rooted at one directory.
#[derive(Debug)]
pub struct RegistryStore {
    dir: PathBuf,
    lock_dir: PathBuf,
    lock_timeout: Duration,
}

impl RegistryStore {
    /// Open (and create if needed) the registry at `dir`.
    pub fn open(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Result<Self> {
        let dir = dir.into();
        let lock_dir = dir.join(LOCK_DIR);
        fs::create_dir_all(&lock_dir).map_err(|e| {
            Error::Persistence(format!(
                "Cannot create registry directory {}: {}",
                lock_dir.display(),
                e
            ))
        })?;
        debug!("Opened registry at {}", dir.display());
        Ok(Self {
            dir,
            lock_dir,
            lock_timeout,
        })
    }

    /// Close the registry. Outstanding [`InstanceLock`] guards stay valid
    /// until dropped.
    pub fn close(self) {
        debug!("Closed registry at {}", self.dir.display());
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.yaml", name))
    }

    /// Load a record, failing with `NotFound` when absent.
    pub fn get(&self, name: &str) -> Result<InstanceRecord> {
        self.find(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Load a record if it exists.
    pub fn find(&self, name: &str) -> Result<Option<InstanceRecord>> {
        validate_name(name)?;
        let path = self.record_path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let record: InstanceRecord = serde_yaml::from_str(&content).map_err(|e| {
            Error::Persistence(format!("Corrupt record {}: {}", path.display(), e))
        })?;
        Ok(Some(record))
    }

    /// All parseable records ordered by name. Unparseable documents are
    /// logged and skipped.
    pub fn list(&self) -> Result<Vec<InstanceRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|c| serde_yaml::from_str::<InstanceRecord>(&c).map_err(Error::from));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Take the exclusive lock for one instance.
    pub async fn lock(&self, name: &str) -> Result<InstanceLock> {
        validate_name(name)?;
        InstanceLock::acquire(&self.lock_dir, name, self.lock_timeout).await
    }

    /// Take the registry-wide lock that serializes name and port claims.
    /// Callers holding an instance lock take this one second.
    pub(crate) async fn lock_registry(&self) -> Result<InstanceLock> {
        InstanceLock::acquire(&self.lock_dir, REGISTRY_LOCK_NAME, self.lock_timeout).await
    }

    /// Fail with `Conflict` if `name` is registered or `port` is claimed by
    /// another non-terminal record.
    pub fn check_available(&self, name: &str, port: u16) -> Result<()> {
        if self.record_path(name).exists() {
            return Err(Error::Conflict(format!(
                "Instance '{}' already exists",
                name
            )));
        }
        if let Some(holder) = self.port_holder(port, Some(name))? {
            return Err(Error::PortConflict {
                port,
                holder: format!("claimed by instance '{}'", holder.name),
            });
        }
        Ok(())
    }

    /// The non-terminal record claiming `port`, ignoring `except`.
    pub fn port_holder(&self, port: u16, except: Option<&str>) -> Result<Option<InstanceRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|r| r.claims_port(port) && Some(r.name.as_str()) != except))
    }

    /// Register a new record.
    pub async fn create(&self, record: &InstanceRecord) -> Result<()> {
        let guard = self.lock(&record.name).await?;
        self.create_locked(&guard, record).await
    }

    /// Register a new record while already holding its lock.
    ///
    /// The name/port check runs under the registry-wide lock so concurrent
    /// creates cannot both claim one port.
    pub async fn create_locked(&self, guard: &InstanceLock, record: &InstanceRecord) -> Result<()> {
        ensure_guard(guard, &record.name)?;
        let _registry = self.lock_registry().await?;
        self.check_available(&record.name, record.port)?;
        self.write_record(record)?;
        info!("Registered instance '{}' on port {}", record.name, record.port);
        Ok(())
    }

    /// Persist `record` while holding its lock. Refreshes `last_modified`.
    pub fn save_locked(&self, guard: &InstanceLock, record: &mut InstanceRecord) -> Result<()> {
        ensure_guard(guard, &record.name)?;
        record.last_modified = Utc::now();
        self.write_record(record)
    }

    /// Atomic read-modify-write of one record.
    pub async fn update<F>(&self, name: &str, mutator: F) -> Result<InstanceRecord>
    where
        F: FnOnce(&mut InstanceRecord) -> Result<()>,
    {
        let guard = self.lock(name).await?;
        self.update_locked(&guard, mutator)
    }

    /// Read-modify-write while already holding the lock.
    pub fn update_locked<F>(&self, guard: &InstanceLock, mutator: F) -> Result<InstanceRecord>
    where
        F: FnOnce(&mut InstanceRecord) -> Result<()>,
    {
        let mut record = self.get(guard.name())?;
        mutator(&mut record)?;
        if record.name != guard.name() {
            return Err(Error::Fatal(format!(
                "Record '{}' was renamed to '{}' during update",
                guard.name(),
                record.name
            )));
        }
        self.save_locked(guard, &mut record)?;
        Ok(record)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let guard = self.lock(name).await?;
        self.delete_locked(&guard)
    }

    pub fn delete_locked(&self, guard: &InstanceLock) -> Result<()> {
        let path = self.record_path(guard.name());
        match fs::remove_file(&path) {
            Ok(()) => {
                crate::atomic::fsync_dir(&self.dir)?;
                info!("Deleted record for '{}'", guard.name());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(guard.name().to_string()))
            }
            Err(e) => Err(Error::Persistence(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn write_record(&self, record: &InstanceRecord) -> Result<()> {
        let yaml = serde_yaml::to_string(record)?;
        atomic_write(&self.record_path(&record.name), yaml.as_bytes(), Some(RECORD_MODE))?;
        debug!(
            "Wrote record '{}' ({})",
            record.name, record.lifecycle_state
        );
        Ok(())
    }
}

fn ensure_guard(guard: &InstanceLock, name: &str) -> Result<()> {
    if guard.name() != name {
        return Err(Error::Fatal(format!(
            "Lock for '{}' used to write record '{}'",
            guard.name(),
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstanceLayout, Settings};

    fn record(root: &Path, name: &str, port: u16) -> InstanceRecord {
        let settings = Settings::rooted(root);
        let layout = InstanceLayout::for_name(&settings, name).unwrap();
        InstanceRecord::initializing(&layout, port, None)
    }

    #[tokio::test]
    async fn create_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::open(dir.path().join("reg"), Duration::from_secs(1)).unwrap();
        store.create(&record(dir.path(), "prod01", 3306)).await.unwrap();

        let loaded = store.get("prod01").unwrap();
        assert_eq!(loaded.port, 3306);
        assert_eq!(loaded.lifecycle_state, LifecycleState::Initializing);
    }

    #[tokio::test]
    async fn duplicate_port_conflicts_unless_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::open(dir.path().join("reg"), Duration::from_secs(1)).unwrap();
        store.create(&record(dir.path(), "prod01", 3306)).await.unwrap();

        let err = store
            .create(&record(dir.path(), "prod02", 3306))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PortConflict { port: 3306, .. }));

        store
            .update("prod01", |r| {
                r.lifecycle_state = LifecycleState::Failed;
                Ok(())
            })
            .await
            .unwrap();
        store.create(&record(dir.path(), "prod02", 3306)).await.unwrap();
    }

    #[tokio::test]
    async fn renaming_in_update_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::open(dir.path().join("reg"), Duration::from_secs(1)).unwrap();
        store.create(&record(dir.path(), "prod01", 3306)).await.unwrap();

        let err = store
            .update("prod01", |r| {
                r.name = "other".to_string();
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
        assert!(store.find("other").unwrap().is_none());
    }

    #[tokio::test]
    async fn list_skips_corrupt_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::open(dir.path().join("reg"), Duration::from_secs(1)).unwrap();
        store.create(&record(dir.path(), "b", 3307)).await.unwrap();
        store.create(&record(dir.path(), "a", 3306)).await.unwrap();
        fs::write(store.dir().join("broken.yaml"), "name: [").unwrap();

        let names: Vec<_> = store.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}

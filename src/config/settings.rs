use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const CONFIG_ENV_VAR: &str = "MYFLEET_CONFIG";
const SYSTEM_CONFIG_PATH: &str = "/etc/myfleet/config.yaml";
const DEFAULT_REGISTRY_DIR: &str = "/etc/myfleet/instances";
const DEFAULT_MIN_FREE_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Global settings for every myfleet invocation on this host.
///
/// Every field has a default, so an empty (or missing) settings file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding one YAML record per instance.
    pub registry_dir: PathBuf,
    /// Parent of every instance datadir.
    pub data_root: PathBuf,
    /// Parent of every instance configuration directory.
    pub config_root: PathBuf,
    /// Parent of every instance log directory.
    pub log_root: PathBuf,
    /// Parent of every instance runtime (socket/pid) directory.
    pub runtime_root: PathBuf,
    /// Parent of every instance backup directory.
    pub backup_root: PathBuf,
    /// Where service units are installed.
    pub unit_dir: PathBuf,
    pub lock_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub startup_timeout_secs: u64,
    /// Free space required on the backup volume before an upgrade backup.
    pub min_free_bytes: u64,
    /// Prefix privileged commands with `sudo` when not running as root.
    pub use_sudo: bool,
    /// `dnf` or `yum`; detected from `PATH` when unset.
    pub package_manager: Option<String>,
    /// Absolute path to `mysqld`; resolved from `PATH` when unset.
    pub mysqld_path: Option<PathBuf>,
    /// Set when `registry_dir` came from a file or flag rather than the default.
    #[serde(skip)]
    registry_dir_explicit: bool,
}

/// Keys whose presence in the file changes behavior beyond their value.
#[derive(Debug, Default, Deserialize)]
struct ExplicitKeys {
    #[serde(default)]
    registry_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry_dir: PathBuf::from(DEFAULT_REGISTRY_DIR),
            data_root: PathBuf::from("/var/lib/mysql-instances"),
            config_root: PathBuf::from("/etc/mysql-instances"),
            log_root: PathBuf::from("/var/log/mysql-instances"),
            runtime_root: PathBuf::from("/var/run"),
            backup_root: PathBuf::from("/var/backups/mysql"),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            lock_timeout_secs: 10,
            command_timeout_secs: 3600,
            startup_timeout_secs: 120,
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
            use_sudo: true,
            package_manager: None,
            mysqld_path: None,
            registry_dir_explicit: false,
        }
    }
}

impl Settings {
    /// Place every root under `root`. Used for sandboxes and tests.
    pub fn rooted(root: &Path) -> Self {
        Self {
            registry_dir: root.join("registry"),
            data_root: root.join("data"),
            config_root: root.join("etc"),
            log_root: root.join("log"),
            runtime_root: root.join("run"),
            backup_root: root.join("backups"),
            unit_dir: root.join("units"),
            use_sudo: false,
            registry_dir_explicit: true,
            ..Self::default()
        }
    }

    /// Load settings following the lookup order:
    /// explicit path, `MYFLEET_CONFIG`, `/etc/myfleet/config.yaml`,
    /// the user config directory, then built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::load_file(Path::new(&path));
        }

        for candidate in Self::candidate_paths() {
            if candidate.exists() {
                return Self::load_file(&candidate);
            }
        }

        debug!("No settings file found, using defaults");
        Ok(Self::default())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("myfleet").join("config.yaml"));
        }
        paths
    }

    /// Load settings from a specific YAML file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read settings file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let settings = Self::parse(&content)?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Parse settings from YAML text. Empty text yields the defaults.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut settings: Settings = serde_yaml::from_str(content)?;
        let keys: ExplicitKeys = serde_yaml::from_str(content)?;
        settings.registry_dir_explicit = keys.registry_dir.is_some();
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.lock_timeout_secs == 0 {
            return Err(Error::Config(
                "lock_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 || self.startup_timeout_secs == 0 {
            return Err(Error::Config(
                "command and startup timeouts must be greater than zero".to_string(),
            ));
        }
        if let Some(manager) = &self.package_manager {
            if !matches!(manager.as_str(), "dnf" | "yum") {
                return Err(Error::Config(format!(
                    "package_manager must be 'dnf' or 'yum', got '{}'",
                    manager
                )));
            }
        }
        Ok(())
    }

    /// Resolve the registry directory, creating it if needed.
    ///
    /// When the default system directory cannot be created (not root), falls
    /// back to `$XDG_STATE_HOME/myfleet/instances`. An explicitly configured
    /// directory never falls back.
    pub fn resolve_registry_dir(&self) -> Result<PathBuf> {
        match fs::create_dir_all(&self.registry_dir) {
            Ok(()) => Ok(self.registry_dir.clone()),
            Err(e)
                if e.kind() == std::io::ErrorKind::PermissionDenied
                    && !self.registry_dir_explicit =>
            {
                let base = dirs::state_dir()
                    .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("state")))
                    .ok_or_else(|| {
                        Error::Config("Could not determine a user state directory".to_string())
                    })?;
                let fallback = base.join("myfleet").join("instances");
                warn!(
                    "Cannot create {} ({}), using {}",
                    self.registry_dir.display(),
                    e,
                    fallback.display()
                );
                fs::create_dir_all(&fallback)?;
                Ok(fallback)
            }
            Err(e) => Err(Error::Persistence(format!(
                "Cannot create registry directory {}: {}",
                self.registry_dir.display(),
                e
            ))),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let settings = Settings::parse("lock_timeout_secs: 3\nuse_sudo: false\n").unwrap();
        assert_eq!(settings.lock_timeout(), Duration::from_secs(3));
        assert!(!settings.use_sudo);
        assert_eq!(settings.min_free_bytes, DEFAULT_MIN_FREE_BYTES);
    }

    #[test]
    fn registry_dir_is_explicit_only_when_set() {
        let settings =
            Settings::parse("# registry_dir stays at its default
lock_timeout_secs: 3
").unwrap();
        assert!(!settings.registry_dir_explicit);

        let settings = Settings::parse("registry_dir: /srv/myfleet/instances
").unwrap();
        assert!(settings.registry_dir_explicit);
        assert_eq!(settings.registry_dir, PathBuf::from("/srv/myfleet/instances"));
    }

    #[test]
    fn rejects_unknown_package_manager() {
        let err = Settings::parse("package_manager: apt\n").unwrap_err();
        assert!(err.to_string().contains("dnf"));
    }

    #[test]
    fn rejects_zero_lock_timeout() {
        assert!(Settings::parse("lock_timeout_secs: 0\n").is_err());
    }

    #[test]
    fn rooted_places_everything_under_root() {
        let root = Path::new("/tmp/sandbox");
        let settings = Settings::rooted(root);
        for dir in [
            &settings.registry_dir,
            &settings.data_root,
            &settings.config_root,
            &settings.log_root,
            &settings.runtime_root,
            &settings.backup_root,
            &settings.unit_dir,
        ] {
            assert!(dir.starts_with(root), "{} not under root", dir.display());
        }
    }

    #[test]
    fn explicit_registry_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::rooted(dir.path());
        let resolved = settings.resolve_registry_dir().unwrap();
        assert_eq!(resolved, dir.path().join("registry"));
        assert!(resolved.is_dir());
    }
}

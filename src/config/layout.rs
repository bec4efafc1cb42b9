use super::Settings;
use crate::error::{Error, Result};
use std::path::PathBuf;

const MAX_NAME_LEN: usize = 64;

/// Every path that belongs to one instance, derived from [`Settings`] and the
/// instance name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLayout {
    pub name: String,
    pub datadir: PathBuf,
    pub conf_dir: PathBuf,
    pub config_path: PathBuf,
    pub credential_path: PathBuf,
    pub log_dir: PathBuf,
    pub error_log: PathBuf,
    pub slow_log: PathBuf,
    pub runtime_dir: PathBuf,
    pub socket: PathBuf,
    pub pid_file: PathBuf,
    pub backup_dir: PathBuf,
    pub service_unit: String,
    pub unit_path: PathBuf,
}

impl InstanceLayout {
    pub fn for_name(settings: &Settings, name: &str) -> Result<Self> {
        validate_name(name)?;

        let conf_dir = settings.config_root.join(name);
        let log_dir = settings.log_root.join(name);
        let runtime_dir = settings.runtime_root.join(format!("mysql-{}", name));
        let service_unit = unit_name(name);

        Ok(Self {
            name: name.to_string(),
            datadir: settings.data_root.join(name),
            config_path: conf_dir.join("my.cnf"),
            credential_path: conf_dir.join("root-credential"),
            conf_dir,
            error_log: log_dir.join("mysqld.log"),
            slow_log: log_dir.join("mysql-slow.log"),
            log_dir,
            socket: runtime_dir.join("mysqld.sock"),
            pid_file: runtime_dir.join("mysqld.pid"),
            runtime_dir,
            backup_dir: settings.backup_root.join(name),
            unit_path: settings.unit_dir.join(&service_unit),
            service_unit,
        })
    }

    /// Directories created at provisioning time, in creation order.
    pub fn directories(&self) -> [&PathBuf; 5] {
        [
            &self.datadir,
            &self.conf_dir,
            &self.log_dir,
            &self.runtime_dir,
            &self.backup_dir,
        ]
    }
}

/// Service unit name for an instance.
pub fn unit_name(name: &str) -> String {
    format!("mysqld-{}.service", name)
}

/// Validate an instance name.
///
/// Names become file and unit names, so only ASCII alphanumerics, `-` and
/// `_` are accepted, the first character must be alphanumeric, and the
/// length is capped.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation(
            "Instance name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "Instance name '{}' is too long (max {} characters)",
            name, MAX_NAME_LEN
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Validation(format!(
            "Instance name '{}' contains invalid characters. Only alphanumeric, '-', and '_' allowed.",
            name
        )));
    }

    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(Error::Validation(format!(
            "Instance name '{}' must start with a letter or digit",
            name
        )));
    }

    Ok(())
}

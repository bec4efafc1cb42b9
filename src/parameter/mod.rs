//! Type-aware `[mysqld]` configuration engine.
//!
//! - `schema` - key grammar, value types and canonical forms
//! - `mycnf` - line-preserving option file rewrite
//!
//! The engine owns the `[mysqld]` section of each instance's `my.cnf`. It
//! never restarts a server; applying a change is the caller's decision.

mod mycnf;
mod schema;

pub use mycnf::OptionFile;
pub use schema::{
    format_size, normalize_key, param_type, parse_live, parse_size, parse_value, validate_key,
    ParamType, ParamValue,
};

use crate::atomic::atomic_write;
use crate::client::MysqlClient;
use crate::config::InstanceLayout;
use crate::error::{Error, Result};
use crate::exec::CommandExecutor;
use crate::registry::{InstanceRecord, LifecycleState};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The section this engine manages.
pub const MANAGED_SECTION: &str = "mysqld";

const CONFIG_MODE: u32 = 0o640;

/// One configured value, rebuilt on every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigParameter {
    /// Key as spelled in the file.
    pub key: String,
    pub raw_value: String,
    pub value: ParamValue,
    pub section: String,
    /// False for keys outside the schema and for typed keys whose file value
    /// does not parse.
    pub validated: bool,
}

/// Whether the live server was consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    NotRequested,
    Skipped(String),
    Queried,
}

/// Configured value next to the live one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterRow {
    pub configured: ConfigParameter,
    /// Live value as reported by the server.
    pub live_raw: Option<String>,
    /// Live value parsed with the configured value's type.
    pub live_value: Option<ParamValue>,
    /// Set when a validated configured value differs from the live one.
    pub drift: bool,
}

#[derive(Debug, Clone)]
pub struct ParameterReport {
    pub instance: String,
    pub config_path: PathBuf,
    pub rows: Vec<ParameterRow>,
    pub live: LiveStatus,
}

impl ParameterReport {
    pub fn drifted(&self) -> impl Iterator<Item = &ParameterRow> {
        self.rows.iter().filter(|r| r.drift)
    }
}

pub struct ParameterEngine {
    executor: Arc<dyn CommandExecutor>,
    query_timeout: Duration,
}

impl ParameterEngine {
    pub fn new(executor: Arc<dyn CommandExecutor>, query_timeout: Duration) -> Self {
        Self {
            executor,
            query_timeout,
        }
    }

    /// Validate `key=value` and write its canonical form into `[mysqld]`.
    pub fn set(&self, record: &InstanceRecord, key: &str, value: &str) -> Result<ConfigParameter> {
        validate_key(key)?;
        let parsed = parse_value(key, value)?;
        let canonical = parsed.canonical();

        let path = &record.config_path;
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Precondition(format!(
                "Cannot read configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut file = OptionFile::parse(&text);
        file.set(MANAGED_SECTION, key, &canonical);
        atomic_write(path, file.render().as_bytes(), None)?;

        info!(
            "Set {}={} in {} for '{}'",
            key,
            canonical,
            path.display(),
            record.name
        );
        Ok(ConfigParameter {
            key: key.to_string(),
            raw_value: canonical,
            validated: parsed.param_type() != ParamType::Raw,
            value: parsed,
            section: MANAGED_SECTION.to_string(),
        })
    }

    /// Every `[mysqld]` option in file order; a repeated key keeps its
    /// last value.
    pub fn read(&self, config_path: &Path) -> Result<Vec<ConfigParameter>> {
        let text = fs::read_to_string(config_path).map_err(|e| {
            Error::Precondition(format!(
                "Cannot read configuration {}: {}",
                config_path.display(),
                e
            ))
        })?;
        let mut params: Vec<ConfigParameter> = Vec::new();
        for (key, raw) in OptionFile::parse(&text).entries(MANAGED_SECTION) {
            let (value, validated) = schema::parse_configured(&key, raw.as_deref());
            let param = ConfigParameter {
                key,
                raw_value: raw.unwrap_or_default(),
                value,
                section: MANAGED_SECTION.to_string(),
                validated,
            };
            match params
                .iter_mut()
                .find(|p| normalize_key(&p.key) == normalize_key(&param.key))
            {
                Some(existing) => *existing = param,
                None => params.push(param),
            }
        }
        Ok(params)
    }

    /// Configured values, optionally compared with the live server.
    pub async fn show(
        &self,
        record: &InstanceRecord,
        key: Option<&str>,
        live: bool,
    ) -> Result<ParameterReport> {
        let mut params = self.read(&record.config_path)?;
        if let Some(key) = key {
            validate_key(key)?;
            let wanted = normalize_key(key);
            params.retain(|p| normalize_key(&p.key) == wanted);
            if params.is_empty() {
                return Err(Error::ParameterNotFound {
                    key: key.to_string(),
                    path: record.config_path.display().to_string(),
                });
            }
        }

        let mut rows: Vec<ParameterRow> = params
            .into_iter()
            .map(|configured| ParameterRow {
                configured,
                live_raw: None,
                live_value: None,
                drift: false,
            })
            .collect();

        let status = if !live {
            LiveStatus::NotRequested
        } else if let Some(reason) = live_skip_reason(record) {
            debug!("Skipping live query for '{}': {}", record.name, reason);
            LiveStatus::Skipped(reason)
        } else {
            match self.live_variables(record).await {
                Ok(variables) => {
                    compare_live(record, &mut rows, &variables);
                    LiveStatus::Queried
                }
                Err(e) => {
                    warn!("Live query for '{}' failed: {}", record.name, e);
                    LiveStatus::Skipped(format!("live query failed: {}", e))
                }
            }
        };

        Ok(ParameterReport {
            instance: record.name.clone(),
            config_path: record.config_path.clone(),
            rows,
            live: status,
        })
    }

    async fn live_variables(&self, record: &InstanceRecord) -> Result<BTreeMap<String, String>> {
        let client = MysqlClient::for_record(self.executor.clone(), record, self.query_timeout)?;
        client.global_variables().await
    }

    /// Render and atomically write the initial `my.cnf` for a new instance.
    pub fn write_initial(&self, layout: &InstanceLayout, port: u16) -> Result<()> {
        let text = render_initial(layout, port);
        atomic_write(&layout.config_path, text.as_bytes(), Some(CONFIG_MODE))?;
        debug!("Wrote initial configuration {}", layout.config_path.display());
        Ok(())
    }
}

fn compare_live(
    record: &InstanceRecord,
    rows: &mut [ParameterRow],
    variables: &BTreeMap<String, String>,
) {
    for row in rows {
        let name = normalize_key(&row.configured.key);
        let Some(raw) = variables.get(&name) else {
            continue;
        };
        let live_value = parse_live(row.configured.value.param_type(), raw);
        row.drift =
            row.configured.validated && live_value.as_ref() != Some(&row.configured.value);
        if row.drift {
            warn!(
                "'{}' drift on {}: configured {}, live {}",
                record.name, row.configured.key, row.configured.raw_value, raw
            );
        }
        row.live_raw = Some(raw.clone());
        row.live_value = live_value;
    }
}

fn live_skip_reason(record: &InstanceRecord) -> Option<String> {
    if record.lifecycle_state != LifecycleState::Running {
        return Some(format!("instance is {}", record.lifecycle_state));
    }
    if !record.credential_applied {
        return Some("credential was never applied".to_string());
    }
    if !record.credential_path.exists() {
        return Some(format!(
            "credential file {} is missing",
            record.credential_path.display()
        ));
    }
    None
}

fn render_initial(layout: &InstanceLayout, port: u16) -> String {
    format!(
        "[mysqld]
user=mysql
datadir={datadir}
socket={socket}
log-error={error_log}
slow_query_log=ON
slow_query_log_file={slow_log}
pid-file={pid_file}
port={port}

# Default tuning (adjust with `myfleet set`)
innodb_buffer_pool_size=1G
max_connections=200
sql_mode=STRICT_TRANS_TABLES,ERROR_FOR_DIVISION_BY_ZERO,NO_ENGINE_SUBSTITUTION

[client]
port={port}
socket={socket}
",
        datadir = layout.datadir.display(),
        socket = layout.socket.display(),
        error_log = layout.error_log.display(),
        slow_log = layout.slow_log.display(),
        pid_file = layout.pid_file.display(),
        port = port,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::exec::SystemExecutor;

    fn engine() -> ParameterEngine {
        ParameterEngine::new(Arc::new(SystemExecutor::new(false)), Duration::from_secs(5))
    }

    fn provisioned(root: &Path) -> InstanceRecord {
        let settings = Settings::rooted(root);
        let layout = InstanceLayout::for_name(&settings, "prod01").unwrap();
        engine().write_initial(&layout, 3306).unwrap();
        InstanceRecord::initializing(&layout, 3306, None)
    }

    #[test]
    fn initial_config_has_default_tuning() {
        let dir = tempfile::tempdir().unwrap();
        let record = provisioned(dir.path());
        let params = engine().read(&record.config_path).unwrap();

        let pool = params
            .iter()
            .find(|p| p.key == "innodb_buffer_pool_size")
            .unwrap();
        assert_eq!(pool.value, ParamValue::SizeBytes(1024 * 1024 * 1024));
        assert!(pool.validated);
        assert!(params.iter().any(|p| p.key == "port" && p.raw_value == "3306"));
        // [client] port is not part of the managed section
        assert_eq!(params.iter().filter(|p| p.key == "port").count(), 1);
    }

    #[test]
    fn set_writes_canonical_form() {
        let dir = tempfile::tempdir().unwrap();
        let record = provisioned(dir.path());
        let param = engine()
            .set(&record, "innodb_buffer_pool_size", "2048m")
            .unwrap();
        assert_eq!(param.raw_value, "2G");

        let text = fs::read_to_string(&record.config_path).unwrap();
        assert!(text.contains("innodb_buffer_pool_size=2G\n"));
        assert!(text.contains("[client]\nport=3306\n"));
    }

    #[test]
    fn set_rejects_bad_value_without_touching_file() {
        let dir = tempfile::tempdir().unwrap();
        let record = provisioned(dir.path());
        let before = fs::read_to_string(&record.config_path).unwrap();
        assert!(engine().set(&record, "max_connections", "many").is_err());
        assert_eq!(fs::read_to_string(&record.config_path).unwrap(), before);
    }

    #[tokio::test]
    async fn show_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let record = provisioned(dir.path());
        let err = engine()
            .show(&record, Some("innodb_log_file_size"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ParameterNotFound { .. }));
    }

    #[tokio::test]
    async fn live_query_skipped_when_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let record = provisioned(dir.path());
        let report = engine()
            .show(&record, Some("max-connections"), true)
            .await
            .unwrap();
        assert_eq!(report.rows.len(), 1);
        assert!(matches!(report.live, LiveStatus::Skipped(_)));
    }
}

//! Credentialed access to a running instance through the MySQL client tools.
//!
//! Every invocation passes `--defaults-extra-file` first, pointing at a
//! short-lived 0600 option file, so the credential stays out of argv.

use crate::credential::{ClientDefaults, Credential};
use crate::error::{Error, Result};
use crate::exec::{CommandExecutor, CommandOutput, CommandSpec};
use crate::registry::InstanceRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const PING_INTERVAL: Duration = Duration::from_millis(500);

pub struct MysqlClient {
    executor: Arc<dyn CommandExecutor>,
    socket: PathBuf,
    credential: Credential,
    timeout: Duration,
}

impl MysqlClient {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        socket: impl Into<PathBuf>,
        credential: Credential,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            socket: socket.into(),
            credential,
            timeout,
        }
    }

    /// Client for `record`, loading its stored credential.
    pub fn for_record(
        executor: Arc<dyn CommandExecutor>,
        record: &InstanceRecord,
        timeout: Duration,
    ) -> Result<Self> {
        let credential = Credential::load(&record.credential_path)?;
        Ok(Self::new(executor, &record.socket, credential, timeout))
    }

    fn spec(&self, program: &str, defaults: &ClientDefaults) -> CommandSpec {
        CommandSpec::new(program)
            .arg(defaults.arg())
            .timeout(self.timeout)
            .privileged()
    }

    /// Run SQL (sent on stdin) and return tab-separated rows.
    pub async fn query(&self, sql: &str) -> Result<Vec<Vec<String>>> {
        let defaults = ClientDefaults::write(&self.credential, &self.socket)?;
        let spec = self
            .spec("mysql", &defaults)
            .args(["--batch", "--skip-column-names"])
            .stdin_bytes(sql.as_bytes().to_vec());
        let output = self.executor.run_checked(&spec).await?;
        Ok(output
            .stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.split('\t').map(str::to_string).collect())
            .collect())
    }

    /// `SHOW GLOBAL VARIABLES` as a name → value map. Names are lowercased.
    pub async fn global_variables(&self) -> Result<BTreeMap<String, String>> {
        let rows = self.query("SHOW GLOBAL VARIABLES;").await?;
        let mut vars = BTreeMap::new();
        for row in rows {
            if let [name, value] = row.as_slice() {
                vars.insert(name.to_ascii_lowercase(), value.clone());
            } else if let [name] = row.as_slice() {
                vars.insert(name.to_ascii_lowercase(), String::new());
            }
        }
        debug!("Read {} global variables", vars.len());
        Ok(vars)
    }

    /// Scalar count from a single-row query, `0` when the result is empty.
    pub async fn count(&self, sql: &str) -> Result<u64> {
        let rows = self.query(sql).await?;
        Ok(rows
            .first()
            .and_then(|r| r.first())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0))
    }

    /// `mysqladmin ping`. A refused connection is `Ok(false)`.
    pub async fn ping(&self) -> Result<bool> {
        let defaults = ClientDefaults::write(&self.credential, &self.socket)?;
        let spec = self.spec("mysqladmin", &defaults).arg("ping");
        let output = self.executor.run(&spec).await?;
        Ok(output.success())
    }

    /// Poll [`ping`](Self::ping) until the server answers or `timeout` passes.
    pub async fn wait_until_alive(&self, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.ping().await? {
                debug!("Server on {} answered after {:?}", self.socket.display(), started.elapsed());
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(Error::CommandTimeout {
                    command: "mysqladmin ping".to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(PING_INTERVAL).await;
        }
    }

    /// Dump every database into `target`. The raw output is returned so the
    /// caller decides what a failure means.
    pub async fn dump(&self, target: &Path, single_transaction: bool) -> Result<CommandOutput> {
        let defaults = ClientDefaults::write(&self.credential, &self.socket)?;
        let mut spec = self
            .spec("mysqldump", &defaults)
            .args(["--all-databases", "--routines", "--events", "--triggers"]);
        if single_transaction {
            spec = spec.arg("--single-transaction");
        }
        let spec = spec.stdout_file(target);
        self.executor.run(&spec).await
    }

    /// Stream a SQL file into the server.
    pub async fn execute_file(&self, path: &Path) -> Result<CommandOutput> {
        let defaults = ClientDefaults::write(&self.credential, &self.socket)?;
        let spec = self.spec("mysql", &defaults).stdin_file(path);
        self.executor.run(&spec).await
    }

    /// Run an upgrade-compatibility tool (`mysql_upgrade` or
    /// `mysqlcheck --check-upgrade`).
    pub async fn run_tool(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let defaults = ClientDefaults::write(&self.credential, &self.socket)?;
        let spec = self
            .spec(program, &defaults)
            .args(args.iter().copied());
        self.executor.run_checked(&spec).await
    }
}

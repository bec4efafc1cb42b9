//! Fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use myfleet::confirm::{AssumeYes, Confirm};
use myfleet::error::{Error, Result};
use myfleet::exec::{CommandExecutor, CommandOutput, CommandSpec, StdinSource, StdoutTarget};
use myfleet::host::HostProbe;
use myfleet::package::{MysqlVersion, PackageSource};
use myfleet::supervisor::{ProcessSupervisor, UnitStatus};
use myfleet::{InitRequest, InstanceRecord, LifecycleController, Settings};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// =============================================================================
// ScriptedExecutor
// =============================================================================

/// Canned result for a matching command.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub exit_code: Option<i32>,
    /// Returned as stdout, or written to the file when stdout is redirected.
    pub stdout: String,
    pub stderr: String,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, stderr: &str) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

struct Rule {
    program: String,
    /// Substrings that must appear in argv or in the stdin bytes.
    needles: Vec<String>,
    reply: Reply,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        if spec.program != self.program && !spec.program.ends_with(&format!("/{}", self.program)) {
            return false;
        }
        let stdin = match &spec.stdin {
            StdinSource::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            _ => String::new(),
        };
        self.needles
            .iter()
            .all(|n| spec.args.iter().any(|a| a.contains(n.as_str())) || stdin.contains(n.as_str()))
    }
}

/// Records every command and answers from scripted rules. Unmatched
/// commands succeed with empty output. Later rules win.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, program: &str, needles: &[&str], reply: Reply) {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            needles: needles.iter().map(|s| s.to_string()).collect(),
            reply,
        });
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, program: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.program == program || c.program.ends_with(&format!("/{}", program)))
            .count()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let reply = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.matches(spec))
            .map(|r| r.reply.clone())
            .unwrap_or_else(|| Reply::ok(""));

        let stdout = match &spec.stdout {
            StdoutTarget::File(path) => {
                std::fs::write(path, &reply.stdout)?;
                String::new()
            }
            StdoutTarget::Capture => reply.stdout,
        };
        Ok(CommandOutput {
            exit_code: reply.exit_code,
            stdout,
            stderr: reply.stderr,
        })
    }
}

// =============================================================================
// FakeSupervisor
// =============================================================================

/// In-memory units. Operations listed in `fail_on` return an external-tool
/// error; `unavailable` makes every call fail like an unreachable systemd.
#[derive(Default)]
pub struct FakeSupervisor {
    units: Mutex<HashMap<String, UnitStatus>>,
    installed: Mutex<HashSet<String>>,
    fail_on: Mutex<HashSet<&'static str>>,
    unavailable: Mutex<bool>,
    restarts: Mutex<usize>,
}

impl FakeSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, operation: &'static str) {
        self.fail_on.lock().unwrap().insert(operation);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    pub fn unit(&self, unit: &str) -> UnitStatus {
        self.units
            .lock()
            .unwrap()
            .get(unit)
            .copied()
            .unwrap_or(UnitStatus::Stopped)
    }

    pub fn is_installed(&self, unit: &str) -> bool {
        self.installed.lock().unwrap().contains(unit)
    }

    pub fn restarts(&self) -> usize {
        *self.restarts.lock().unwrap()
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(Error::Unavailable("fake supervisor is down".to_string()));
        }
        if self.fail_on.lock().unwrap().contains(operation) {
            return Err(Error::external(
                format!("systemctl {}", operation),
                Some(1),
                "scripted failure",
            ));
        }
        Ok(())
    }

    fn set(&self, unit: &str, status: UnitStatus) {
        self.units.lock().unwrap().insert(unit.to_string(), status);
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn start(&self, unit: &str) -> Result<()> {
        self.check("start")?;
        self.set(unit, UnitStatus::Running);
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        self.check("stop")?;
        self.set(unit, UnitStatus::Stopped);
        Ok(())
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.check("restart")?;
        *self.restarts.lock().unwrap() += 1;
        self.set(unit, UnitStatus::Running);
        Ok(())
    }

    async fn status(&self, unit: &str) -> Result<UnitStatus> {
        self.check("status")?;
        Ok(self.unit(unit))
    }

    async fn install(&self, record: &InstanceRecord) -> Result<()> {
        self.check("install")?;
        self.installed
            .lock()
            .unwrap()
            .insert(record.service_unit.clone());
        Ok(())
    }

    async fn uninstall(&self, unit: &str) -> Result<()> {
        self.check("uninstall")?;
        self.installed.lock().unwrap().remove(unit);
        self.units.lock().unwrap().remove(unit);
        Ok(())
    }
}

// =============================================================================
// FakePackages
// =============================================================================

#[derive(Default)]
pub struct FakePackages {
    available: Mutex<Vec<MysqlVersion>>,
    installed: Mutex<Vec<MysqlVersion>>,
    conflicts: Mutex<BTreeSet<String>>,
    fail_install: Mutex<bool>,
}

impl FakePackages {
    pub fn new(available: &[MysqlVersion]) -> Arc<Self> {
        let packages = Self::default();
        *packages.available.lock().unwrap() = available.to_vec();
        Arc::new(packages)
    }

    pub fn fail_install(&self) {
        *self.fail_install.lock().unwrap() = true;
    }

    pub fn add_conflict(&self, package: &str) {
        self.conflicts.lock().unwrap().insert(package.to_string());
    }

    pub fn installed(&self) -> Vec<MysqlVersion> {
        self.installed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageSource for FakePackages {
    async fn list_available(&self, line: &MysqlVersion) -> Result<Vec<MysqlVersion>> {
        let mut versions: Vec<_> = self
            .available
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.in_line(line))
            .copied()
            .collect();
        versions.sort_by(|a, b| b.cmp(a));
        Ok(versions)
    }

    async fn install(&self, version: &MysqlVersion) -> Result<()> {
        if *self.fail_install.lock().unwrap() {
            return Err(Error::external(
                "dnf install",
                Some(1),
                "Error: Transaction test error: file conflicts",
            ));
        }
        self.installed.lock().unwrap().push(*version);
        Ok(())
    }

    async fn conflicts(&self, _pattern: &str) -> Result<BTreeSet<String>> {
        Ok(self.conflicts.lock().unwrap().clone())
    }
}

// =============================================================================
// FakeHost
// =============================================================================

pub struct FakeHost {
    busy_ports: Mutex<HashSet<u16>>,
    free_bytes: Mutex<u64>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            busy_ports: Mutex::new(HashSet::new()),
            free_bytes: Mutex::new(u64::MAX),
        })
    }

    pub fn occupy(&self, port: u16) {
        self.busy_ports.lock().unwrap().insert(port);
    }

    pub fn set_free_bytes(&self, bytes: u64) {
        *self.free_bytes.lock().unwrap() = bytes;
    }
}

impl HostProbe for FakeHost {
    fn port_in_use(&self, port: u16) -> bool {
        self.busy_ports.lock().unwrap().contains(&port)
    }

    fn free_bytes(&self, _path: &Path) -> Result<u64> {
        Ok(*self.free_bytes.lock().unwrap())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A controller rooted in a temp directory with every collaborator faked.
pub struct Harness {
    pub dir: TempDir,
    pub executor: Arc<ScriptedExecutor>,
    pub supervisor: Arc<FakeSupervisor>,
    pub packages: Arc<FakePackages>,
    pub host: Arc<FakeHost>,
    pub controller: LifecycleController,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_confirm(Arc::new(AssumeYes))
    }

    pub fn with_confirm(confirm: Arc<dyn Confirm>) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let executor = ScriptedExecutor::new();
        let supervisor = FakeSupervisor::new();
        let packages = FakePackages::new(&[
            MysqlVersion::new(8, 0, 34),
            MysqlVersion::new(8, 0, 35),
            MysqlVersion::new(8, 0, 36),
            MysqlVersion::new(9, 0, 1),
        ]);
        let host = FakeHost::new();
        let controller = LifecycleController::builder(test_settings(dir.path()))
            .executor(executor.clone())
            .supervisor(supervisor.clone())
            .packages(packages.clone())
            .host(host.clone())
            .confirm(confirm)
            .build()
            .expect("Failed to build controller");
        Self {
            dir,
            executor,
            supervisor,
            packages,
            host,
            controller,
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Provision `name` on `port` with a known version; returns the record.
    pub async fn provision(&self, name: &str, port: u16) -> InstanceRecord {
        self.controller
            .init(
                InitRequest::new(name)
                    .port(port)
                    .version(MysqlVersion::new(8, 0, 34)),
            )
            .await
            .expect("init failed")
            .record()
            .clone()
    }

    /// Provision and start `name`.
    pub async fn running(&self, name: &str, port: u16) -> InstanceRecord {
        self.provision(name, port).await;
        self.controller.start(name).await.expect("start failed")
    }
}

pub fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::rooted(root);
    settings.mysqld_path = Some(PathBuf::from("/usr/sbin/mysqld"));
    settings.lock_timeout_secs = 2;
    settings.startup_timeout_secs = 2;
    settings
}

/// A complete mysqldump body.
pub const DUMP: &str = "-- MySQL dump 10.13\n\
CREATE DATABASE app;\n\
INSERT INTO app.t VALUES (1);\n\
-- Dump completed on 2024-05-01 10:00:00\n";

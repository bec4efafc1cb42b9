use super::{MysqlVersion, PackageSource};
use crate::error::{Error, Result};
use crate::exec::{CommandExecutor, CommandSpec};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SERVER_PACKAGE: &str = "mysql-community-server";
const CLIENT_PACKAGE: &str = "mysql-community-client";
const QUERY_TIMEOUT: Duration = Duration::from_secs(300);

/// [`PackageSource`] for RPM hosts using the MySQL community repositories.
///
/// The package manager is resolved on first use, so hosts without one can
/// still run every other command.
pub struct YumPackageSource {
    executor: Arc<dyn CommandExecutor>,
    configured: Option<String>,
    install_timeout: Duration,
}

impl YumPackageSource {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        configured: Option<String>,
        install_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            configured,
            install_timeout,
        }
    }

    fn manager(&self) -> Result<String> {
        detect_manager(self.configured.as_deref())
    }
}

/// Use `configured` if set, otherwise the first of `dnf`, `yum` on `PATH`.
pub fn detect_manager(configured: Option<&str>) -> Result<String> {
    if let Some(manager) = configured {
        return Ok(manager.to_string());
    }
    for candidate in ["dnf", "yum"] {
        if which::which(candidate).is_ok() {
            debug!("Using package manager {}", candidate);
            return Ok(candidate.to_string());
        }
    }
    Err(Error::Precondition(
        "Neither dnf nor yum is available on this system".to_string(),
    ))
}

/// Parse `<mgr> list --showduplicates` output into versions.
///
/// Lines look like `mysql-community-server.x86_64   8.0.36-1.el7   mysql80-community`.
pub(crate) fn parse_listing(output: &str) -> Vec<MysqlVersion> {
    let mut versions: Vec<MysqlVersion> = output
        .lines()
        .filter(|line| line.starts_with(SERVER_PACKAGE))
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|field| field.parse::<MysqlVersion>().ok())
        .filter(|v| !v.is_line())
        .collect();
    versions.sort_by(|a, b| b.cmp(a));
    versions.dedup();
    versions
}

/// `name` matches exactly; `prefix*` matches case-insensitively by prefix.
pub(crate) fn matches_pattern(package: &str, pattern: &str) -> bool {
    let package = package.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    match pattern.strip_suffix('*') {
        Some(prefix) => package.starts_with(prefix),
        None => package == pattern,
    }
}

#[async_trait]
impl PackageSource for YumPackageSource {
    async fn list_available(&self, line: &MysqlVersion) -> Result<Vec<MysqlVersion>> {
        let spec = CommandSpec::new(self.manager()?)
            .args(["list", "--showduplicates", SERVER_PACKAGE])
            .timeout(QUERY_TIMEOUT);
        let output = self.executor.run_checked(&spec).await?;
        let versions: Vec<_> = parse_listing(&output.stdout)
            .into_iter()
            .filter(|v| v.in_line(line))
            .collect();
        if versions.is_empty() {
            warn!("No {} versions found in line {}", SERVER_PACKAGE, line);
        }
        Ok(versions)
    }

    async fn install(&self, version: &MysqlVersion) -> Result<()> {
        let manager = self.manager()?;
        info!("Installing MySQL {} with {}", version, manager);
        let spec = CommandSpec::new(manager)
            .args([
                "install".to_string(),
                "-y".to_string(),
                format!("{}-{}", SERVER_PACKAGE, version),
                format!("{}-{}", CLIENT_PACKAGE, version),
            ])
            .timeout(self.install_timeout)
            .privileged();
        self.executor.run_checked(&spec).await?;
        Ok(())
    }

    async fn conflicts(&self, pattern: &str) -> Result<BTreeSet<String>> {
        let spec = CommandSpec::new("rpm").arg("-qa").timeout(QUERY_TIMEOUT);
        let output = self.executor.run_checked(&spec).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|p| !p.is_empty() && matches_pattern(p, pattern))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Available Packages
mysql-community-server.x86_64      8.0.34-1.el7      mysql80-community
mysql-community-server.x86_64      8.0.36-1.el7      mysql80-community
mysql-community-server.x86_64      8.0.35-1.el7      mysql80-community
mysql-community-server.x86_64      8.0.36-1.el7      @mysql80-community
";

    #[test]
    fn listing_is_newest_first_and_deduplicated() {
        let versions = parse_listing(LISTING);
        assert_eq!(
            versions,
            vec![
                MysqlVersion::new(8, 0, 36),
                MysqlVersion::new(8, 0, 35),
                MysqlVersion::new(8, 0, 34),
            ]
        );
    }

    #[test]
    fn glob_patterns() {
        assert!(matches_pattern("MariaDB-libs-10.5.16-1.el7.x86_64", "mariadb*"));
        assert!(!matches_pattern("mysql-community-libs-8.0.36", "mariadb*"));
        assert!(matches_pattern("mariadb", "mariadb"));
    }
}

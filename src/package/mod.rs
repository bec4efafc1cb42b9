//! MySQL server package discovery and installation.
//!
//! - `version` - [`MysqlVersion`] parsing and ordering
//! - `yum` - [`YumPackageSource`], the `dnf`/`yum` + `rpm` implementation

mod version;
mod yum;

pub use version::MysqlVersion;
pub use yum::{detect_manager, YumPackageSource};

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Installed packages that replace the MySQL server and block installs.
pub const CONFLICT_PATTERN: &str = "mariadb*";

/// Resolver for installable server versions.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Versions available in the `major.minor` line of `line`, newest first.
    async fn list_available(&self, line: &MysqlVersion) -> Result<Vec<MysqlVersion>>;

    /// Install (or upgrade to) exactly `version`. Mutates system package state.
    async fn install(&self, version: &MysqlVersion) -> Result<()>;

    /// Installed packages matching `pattern` (`name` or `prefix*`).
    async fn conflicts(&self, pattern: &str) -> Result<BTreeSet<String>>;
}

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// A server version, either a full `major.minor.patch` or a `major.minor` line.
///
/// Ordering compares major, minor, then patch; a bare line sorts before
/// every patch in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MysqlVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

static VERSION_REGEX: OnceLock<Regex> = OnceLock::new();
static BANNER_REGEX: OnceLock<Regex> = OnceLock::new();

fn version_regex() -> &'static Regex {
    VERSION_REGEX.get_or_init(|| {
        Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?(?:-[0-9A-Za-z._]+)?$")
            .expect("static regex pattern is valid")
    })
}

fn banner_regex() -> &'static Regex {
    BANNER_REGEX.get_or_init(|| {
        Regex::new(r"Ver\s+(\d+\.\d+\.\d+)").expect("static regex pattern is valid")
    })
}

impl MysqlVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch: Some(patch),
        }
    }

    pub fn line(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            patch: None,
        }
    }

    /// True for a `major.minor` line without a patch.
    pub fn is_line(&self) -> bool {
        self.patch.is_none()
    }

    /// The `major.minor` line this version belongs to.
    pub fn to_line(&self) -> Self {
        Self::line(self.major, self.minor)
    }

    pub fn in_line(&self, line: &MysqlVersion) -> bool {
        self.major == line.major && self.minor == line.minor
    }

    /// Parse the `mysqld --version` banner,
    /// e.g. `mysqld  Ver 8.0.36 for Linux on x86_64 (MySQL Community Server - GPL)`.
    pub fn from_server_banner(banner: &str) -> Result<Self> {
        let captures = banner_regex().captures(banner).ok_or_else(|| {
            Error::Validation(format!(
                "Cannot find a version in '{}'",
                banner.trim()
            ))
        })?;
        captures[1].parse()
    }

    /// Targets older than 8.0.16 need `mysql_upgrade`; newer servers upgrade
    /// their own data dictionary.
    pub fn needs_mysql_upgrade(&self) -> bool {
        *self < MysqlVersion::new(8, 0, 16)
    }
}

impl FromStr for MysqlVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidValue {
            key: "version".to_string(),
            value: s.to_string(),
            expected: "MAJOR.MINOR or MAJOR.MINOR.PATCH (e.g. 8.0 or 8.0.36)".to_string(),
        };
        let captures = version_regex().captures(s.trim()).ok_or_else(invalid)?;
        let number = |i: usize| -> Result<u32> { captures[i].parse().map_err(|_| invalid()) };
        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: match captures.get(3) {
                Some(m) => Some(m.as_str().parse().map_err(|_| invalid())?),
                None => None,
            },
        })
    }
}

impl TryFrom<String> for MysqlVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MysqlVersion> for String {
    fn from(value: MysqlVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MysqlVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

//! Root credential handling.
//!
//! A [`Credential`] never appears in logs, errors or argv. Tools receive it
//! through short-lived 0600 files: [`ClientDefaults`] for client tools
//! (`--defaults-extra-file`) and [`InitFile`] for server bootstrap
//! (`--init-file`).

use crate::atomic::atomic_write;
use crate::error::{Error, Result};
use rand::Rng;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const CREDENTIAL_MODE: u32 = 0o600;
const CREDENTIAL_LEN: usize = 32;

/// Root password of one instance.
///
/// `Debug` is redacted. There is no `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl Credential {
    /// Generate a random credential using a CSPRNG (`thread_rng`).
    ///
    /// 32-char alphanumeric, so it never needs quoting in option files or SQL.
    pub fn generate() -> Self {
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        let secret = (0..CREDENTIAL_LEN)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();
        Credential(secret)
    }

    /// Borrow the secret. Only option-file and SQL renderers should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Store atomically with mode 0600.
    pub fn store(&self, path: &Path) -> Result<()> {
        atomic_write(path, format!("{}\n", self.0).as_bytes(), Some(CREDENTIAL_MODE))?;
        debug!("Stored credential at {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Precondition(format!(
                "Cannot read credential {}: {}",
                path.display(),
                e
            ))
        })?;
        let secret = content.trim();
        if secret.is_empty() || secret.contains(['\'', '"', '\\', '\n']) {
            return Err(Error::Precondition(format!(
                "Credential file {} is empty or malformed",
                path.display()
            )));
        }
        Ok(Credential(secret.to_string()))
    }
}

/// A temporary `[client]` option file for `--defaults-extra-file`.
///
/// The file is removed when this value drops, so keep it alive until the
/// command finishes.
pub struct ClientDefaults {
    file: NamedTempFile,
}

impl ClientDefaults {
    pub fn write(credential: &Credential, socket: &Path) -> Result<Self> {
        let mut file = NamedTempFile::new()
            .map_err(|e| Error::Persistence(format!("Failed to create option file: {}", e)))?;
        restrict(file.path())?;
        write!(
            file,
            "[client]\nuser=root\npassword=\"{}\"\nsocket={}\n",
            credential.expose(),
            socket.display()
        )?;
        file.flush()?;
        Ok(Self { file })
    }

    /// The argument to pass first on the client command line.
    pub fn arg(&self) -> String {
        format!("--defaults-extra-file={}", self.file.path().display())
    }
}

/// A temporary SQL file for `mysqld --init-file` that sets the root password.
pub struct InitFile {
    file: NamedTempFile,
}

impl InitFile {
    /// Write the init file into `dir`. The server reads it after dropping to
    /// the `mysql` user, so ownership is handed to that user when it exists.
    pub fn write(credential: &Credential, dir: &Path) -> Result<Self> {
        let mut file = NamedTempFile::new_in(dir)
            .map_err(|e| Error::Persistence(format!("Failed to create init file: {}", e)))?;
        restrict(file.path())?;
        write!(
            file,
            "ALTER USER 'root'@'localhost' IDENTIFIED BY '{}';\n",
            credential.expose()
        )?;
        file.flush()?;
        file.as_file().sync_all()?;
        hand_to_mysql_user(file.path());
        Ok(Self { file })
    }

    pub fn arg(&self) -> String {
        format!("--init-file={}", self.file.path().display())
    }
}

fn restrict(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(CREDENTIAL_MODE))?;
    Ok(())
}

/// Best-effort chown of `path` to the `mysql` user when running as root.
pub(crate) fn hand_to_mysql_user(path: &Path) {
    if !nix::unistd::geteuid().is_root() {
        return;
    }
    match nix::unistd::User::from_name("mysql") {
        Ok(Some(user)) => {
            if let Err(e) = nix::unistd::chown(path, Some(user.uid), Some(user.gid)) {
                warn!("Could not hand {} to mysql user: {}", path.display(), e);
            }
        }
        Ok(None) => debug!("No mysql user on this host; leaving {} as is", path.display()),
        Err(e) => warn!("User lookup failed: {}", e),
    }
}

//! Host-level probes: listening ports and free disk space.

use crate::error::{Error, Result};
use std::path::Path;

pub trait HostProbe: Send + Sync {
    /// True if something on the host already listens on `port`.
    fn port_in_use(&self, port: u16) -> bool;

    /// Bytes available to unprivileged users on the filesystem holding
    /// `path`. A missing path is measured at its nearest existing ancestor.
    fn free_bytes(&self, path: &Path) -> Result<u64>;
}

/// Probes the real host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl HostProbe for SystemHost {
    fn port_in_use(&self, port: u16) -> bool {
        ["127.0.0.1", "0.0.0.0"]
            .into_iter()
            .any(|addr| !can_bind(addr, port))
    }

    fn free_bytes(&self, path: &Path) -> Result<u64> {
        let existing = path
            .ancestors()
            .find(|p| p.exists())
            .ok_or_else(|| Error::Precondition(format!("No existing ancestor of {}", path.display())))?;
        let stat = nix::sys::statvfs::statvfs(existing).map_err(|e| {
            Error::Precondition(format!(
                "Cannot stat filesystem of {}: {}",
                existing.display(),
                e
            ))
        })?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }
}

/// The listener is dropped before returning, so probes never overlap.
fn can_bind(addr: &str, port: u16) -> bool {
    match std::net::TcpListener::bind((addr, port)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(_) => false,
    }
}

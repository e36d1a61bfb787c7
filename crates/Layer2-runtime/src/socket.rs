//! Socket path resolution
//!
//! Unix socket addresses are limited by `sun_path` (104 bytes on macOS, 108 on Linux).
//! Paths that would not fit are moved to a short directory derived from a hash of the
//! base directory, so the same base directory always lands on the same address.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Longest socket path we hand to `bind`/`connect`
pub const MAX_SOCKET_PATH: usize = 100;

/// Root for shortened socket directories
const FALLBACK_ROOT: &str = "/tmp";

/// Prefix of shortened socket directories
const FALLBACK_PREFIX: &str = "applet-rt-";

/// Hex characters of the base directory hash kept in the fallback name
const HASH_LEN: usize = 12;

/// Maps channel file names to socket paths under one base directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketPathResolver {
    base_dir: PathBuf,
}

impl SocketPathResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve `file_name` to a bindable socket path. Pure: touches no filesystem state.
    pub fn resolve(&self, file_name: &str) -> PathBuf {
        let candidate = self.base_dir.join(file_name);
        if candidate.as_os_str().len() < MAX_SOCKET_PATH {
            return candidate;
        }
        self.fallback_dir().join(file_name)
    }

    /// Create the directory a resolved path lives in
    pub fn prepare(&self, socket_path: &Path) -> std::io::Result<()> {
        match socket_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
            _ => Ok(()),
        }
    }

    /// Remove a socket file left behind by a previous instance
    pub fn remove_stale(&self, socket_path: &Path) {
        match std::fs::remove_file(socket_path) {
            Ok(()) => tracing::debug!("Removed stale socket {}", socket_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove stale socket {}: {}",
                socket_path.display(),
                e
            ),
        }
    }

    fn fallback_dir(&self) -> PathBuf {
        let digest = Sha256::digest(self.base_dir.as_os_str().as_encoded_bytes());
        let hash = hex::encode(digest);
        Path::new(FALLBACK_ROOT).join(format!("{}{}", FALLBACK_PREFIX, &hash[..HASH_LEN]))
    }
}

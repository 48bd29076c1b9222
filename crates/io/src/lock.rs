//! Exclusive document locks.
//!
//! A session holds `<document>.lock` for its whole lifetime. The file is
//! created with create-new semantics, so a second session (in this or any
//! other process) fails to open the document instead of racing on save.
//! The lock is removed when the guard is dropped.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DocumentError;

/// Lock file contents, informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process holding the lock
    pub pid: u32,
    pub created_at: DateTime<Utc>,
}

/// Path of the lock file guarding `document`.
pub fn lock_path(document: &Path) -> PathBuf {
    sibling(document, "lock")
}

/// `<document>.<suffix>` next to the document.
pub(crate) fn sibling(document: &Path, suffix: &str) -> PathBuf {
    let mut name = document.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    document.with_file_name(name)
}

/// Guard for an acquired lock.
#[derive(Debug)]
pub struct DocumentLock {
    path: PathBuf,
}

impl DocumentLock {
    pub fn acquire(document: &Path) -> Result<Self, DocumentError> {
        let path = lock_path(document);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = read_holder(&path);
                return Err(DocumentError::Locked {
                    path: document.to_path_buf(),
                    pid: holder.map(|info| info.pid),
                });
            }
            Err(e) => return Err(DocumentError::Io(format!("{}: {}", path.display(), e))),
        };

        let lock = Self { path };
        let info = LockInfo {
            pid: std::process::id(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&info).map_err(|e| DocumentError::Io(e.to_string()))?;
        file.write_all(json.as_bytes())
            .map_err(|e| DocumentError::Io(format!("{}: {}", lock.path.display(), e)))?;

        log::debug!("Acquired document lock {}", lock.path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to remove lock {}: {}", self.path.display(), e);
        } else {
            log::debug!("Released document lock {}", self.path.display());
        }
    }
}

fn read_holder(path: &Path) -> Option<LockInfo> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

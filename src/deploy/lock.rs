// ABOUTME: Host-local deploy lock preventing concurrent runs against one state dir.
// ABOUTME: Atomic file creation with holder info stored as JSON next to the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::DeployError;

const LOCK_FILE: &str = "deploy.lock";

/// Information about who holds a deploy lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Operation that took the lock (deploy, rollback).
    pub operation: String,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new(operation: &str) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            operation: operation.to_string(),
        }
    }

    /// Check if this lock is stale (older than 1 hour).
    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.started_at;
        age.num_hours() >= 1
    }

    pub fn lock_path(state_dir: &Path) -> PathBuf {
        state_dir.join(LOCK_FILE)
    }
}

/// A held deploy lock. Release explicitly; dropping also removes the file.
#[derive(Debug)]
pub struct DeployLock {
    path: PathBuf,
    released: bool,
}

impl DeployLock {
    /// Acquire the lock in `state_dir`, creating the directory if needed.
    ///
    /// Uses `create_new` for atomic acquisition. Stale locks (>1 hour),
    /// unreadable lock files and, with `force`, any lock are broken with a
    /// warning.
    pub fn acquire(state_dir: &Path, operation: &str, force: bool) -> Result<Self, DeployError> {
        std::fs::create_dir_all(state_dir).map_err(|e| {
            DeployError::Lock(format!(
                "failed to create state directory {}: {}",
                state_dir.display(),
                e
            ))
        })?;

        let path = LockInfo::lock_path(state_dir);
        let info = LockInfo::new(operation);
        let json = serde_json::to_string(&info)
            .map_err(|e| DeployError::Lock(format!("failed to serialize lock: {}", e)))?;

        if Self::try_create(&path, &json)? {
            return Ok(Self {
                path,
                released: false,
            });
        }

        if !Self::should_break(&path, force)? {
            return match Self::read_info(&path) {
                Some(existing) => Err(DeployError::Locked {
                    holder: existing.holder,
                    pid: existing.pid,
                    since: existing.started_at,
                }),
                None => Err(DeployError::Lock("lock held by another process".to_string())),
            };
        }

        tracing::debug!("Removing stale/forced lock at {}", path.display());
        let _ = std::fs::remove_file(&path);

        if !Self::try_create(&path, &json)? {
            return Err(DeployError::Lock(
                "lock acquired by another process during break".to_string(),
            ));
        }

        Ok(Self {
            path,
            released: false,
        })
    }

    fn try_create(path: &Path, json: &str) -> Result<bool, DeployError> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                file.write_all(json.as_bytes())
                    .map_err(|e| DeployError::Lock(format!("failed to write lock: {}", e)))?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(DeployError::Lock(format!(
                "failed to acquire lock {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn read_info(path: &Path) -> Option<LockInfo> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Check if an existing lock should be broken (stale, forced, or corrupted).
    fn should_break(path: &Path, force: bool) -> Result<bool, DeployError> {
        let Some(existing) = Self::read_info(path) else {
            tracing::warn!("Lock info unreadable, breaking lock");
            return Ok(true);
        };

        if force {
            tracing::warn!(
                "Breaking lock held by {} (pid {}) since {}",
                existing.holder,
                existing.pid,
                existing.started_at
            );
            Ok(true)
        } else if existing.is_stale() {
            tracing::warn!(
                "Auto-breaking stale lock held by {} (pid {}) since {}",
                existing.holder,
                existing.pid,
                existing.started_at
            );
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release the lock.
    pub fn release(mut self) -> Result<(), DeployError> {
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::Lock(format!("failed to release lock: {}", e))),
        }
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_info_creates_with_current_host_and_pid() {
        let info = LockInfo::new("deploy");

        assert_eq!(info.operation, "deploy");
        assert_eq!(info.pid, std::process::id());
        assert!(!info.holder.is_empty());
    }

    #[test]
    fn fresh_lock_is_not_stale() {
        assert!(!LockInfo::new("deploy").is_stale());
    }

    #[test]
    fn old_lock_is_stale() {
        let mut info = LockInfo::new("deploy");
        info.started_at = Utc::now() - chrono::Duration::hours(2);
        assert!(info.is_stale());
    }

    #[test]
    fn second_acquire_reports_holder() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DeployLock::acquire(dir.path(), "deploy", false).unwrap();

        let err = DeployLock::acquire(dir.path(), "deploy", false).unwrap_err();
        match err {
            DeployError::Locked { pid, .. } => assert_eq!(pid, std::process::id()),
            other => panic!("expected Locked, got {:?}", other),
        }

        lock.release().unwrap();
        assert!(!LockInfo::lock_path(dir.path()).exists());
        DeployLock::acquire(dir.path(), "deploy", false).unwrap();
    }

    #[test]
    fn force_and_stale_locks_are_broken() {
        let dir = tempfile::tempdir().unwrap();
        let held = DeployLock::acquire(dir.path(), "deploy", false).unwrap();
        let forced = DeployLock::acquire(dir.path(), "rollback", true).unwrap();
        std::mem::forget(held);
        drop(forced);

        let mut stale = LockInfo::new("deploy");
        stale.started_at = Utc::now() - chrono::Duration::hours(3);
        std::fs::write(
            LockInfo::lock_path(dir.path()),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();
        DeployLock::acquire(dir.path(), "deploy", false).unwrap();
    }

    #[test]
    fn corrupted_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(LockInfo::lock_path(dir.path()), "not json").unwrap();
        DeployLock::acquire(dir.path(), "deploy", false).unwrap();
    }
}

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::Result;

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

/// File lock that keeps two sync runs from working the same store at once.
#[derive(Debug, Clone)]
pub struct SyncLock {
    path: PathBuf,
    stale_after: Duration,
}

/// Held while a run is in progress; removes the lock file on drop.
#[derive(Debug)]
pub struct SyncLockGuard {
    path: PathBuf,
}

impl SyncLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when another live run holds the lock. A lock older than
    /// the staleness window is assumed abandoned and taken over.
    pub fn try_acquire(&self) -> Result<Option<SyncLockGuard>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        match self.create() {
            Ok(guard) => return Ok(Some(guard)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err.into()),
        }
        if !self.is_stale()? {
            info!(path = %self.path.display(), "sync lock held, skipping run");
            return Ok(None);
        }
        warn!(path = %self.path.display(), "reclaiming stale sync lock");
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        match self.create() {
            Ok(guard) => Ok(Some(guard)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn create(&self) -> std::io::Result<SyncLockGuard> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(SyncLockGuard {
            path: self.path.clone(),
        })
    }

    fn is_stale(&self) -> Result<bool> {
        let modified = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.modified()?,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(err.into()),
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(age > self.stale_after)
    }
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to release sync lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::SyncLock;
    use crate::store::tests::temp_db_path;

    #[test]
    fn second_acquire_is_refused_until_guard_drops() -> anyhow::Result<()> {
        let path = temp_db_path("lock").with_extension("lock");
        let lock = SyncLock::new(&path);

        let guard = lock.try_acquire()?;
        assert!(guard.is_some());
        assert!(lock.try_acquire()?.is_none());

        drop(guard);
        assert!(!path.exists());
        assert!(lock.try_acquire()?.is_some());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn stale_lock_is_reclaimed() -> anyhow::Result<()> {
        let path = temp_db_path("stale").with_extension("lock");
        std::fs::write(&path, "12345\n")?;
        std::thread::sleep(Duration::from_millis(20));

        let lock = SyncLock::new(&path).with_stale_after(Duration::from_millis(1));
        let guard = lock.try_acquire()?;
        assert!(guard.is_some());
        drop(guard);
        assert!(!path.exists());
        Ok(())
    }
}

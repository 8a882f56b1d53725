// src/update/lock.rs

//! Per-application exclusive update lock
//!
//! At most one update operation may touch an application's package store
//! at a time. Acquisition never waits: a second caller fails fast with
//! `AlreadyInProgress` and decides for itself whether to try later.
//!
//! # Lock Strategy
//!
//! - **FileUpdateLock**: `flock`/`LockFileEx` on `.{app_id}.lock` in the
//!   package store, host-wide and released by the OS if the process dies
//! - **InMemoryUpdateLock**: a shared set of held ids, for tests and for
//!   hosts that embed several managers in one process
//!
//! # Example
//!
//! ```ignore
//! use updraft::update::{FileUpdateLock, UpdateLock};
//!
//! let lock = FileUpdateLock::new("/var/lib/myapp/packages");
//! let _guard = lock.try_acquire("myapp")?;
//! // ... mutate the package store ...
//! // Lock released on drop, including on early return and panic
//! ```

use crate::error::{Error, Result};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Non-blocking mutual exclusion keyed by application id
pub trait UpdateLock: Send + Sync {
    /// Take the lock for `app_id`
    ///
    /// # Errors
    /// `AlreadyInProgress` if another holder has it.
    fn try_acquire(&self, app_id: &str) -> Result<LockHandle>;
}

/// Scope guard for a held lock
///
/// Dropping the handle drops the backing guard, which releases the lock.
pub struct LockHandle {
    app_id: String,
    _guard: Box<dyn Send>,
}

impl LockHandle {
    /// Wrap a guard whose drop releases the lock
    pub fn new(app_id: impl Into<String>, guard: impl Send + 'static) -> Self {
        Self {
            app_id: app_id.into(),
            _guard: Box::new(guard),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        info!("Released update lock for {}", self.app_id);
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle").field("app_id", &self.app_id).finish()
    }
}

/// Lock file based update lock
#[derive(Debug, Clone)]
pub struct FileUpdateLock {
    dir: PathBuf,
}

impl FileUpdateLock {
    /// Lock files are created in `dir` (usually the package store)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the lock file for an application
    pub fn lock_path(&self, app_id: &str) -> PathBuf {
        let safe: String = app_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
            .collect();
        self.dir.join(format!(".{}.lock", safe))
    }

    /// Check whether some process holds the lock, without keeping it
    pub fn is_held(&self, app_id: &str) -> bool {
        let path = self.lock_path(app_id);
        let Ok(file) = File::open(&path) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.unlock();
                false
            }
            Err(_) => true,
        }
    }
}

/// Open lock file; closing it releases the OS lock
struct FileGuard {
    file: File,
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl UpdateLock for FileUpdateLock {
    fn try_acquire(&self, app_id: &str) -> Result<LockHandle> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::IoError(format!("Failed to create lock directory {}: {}", self.dir.display(), e))
        })?;

        let path = self.lock_path(app_id);
        // Never truncate or delete the lock file: another process may hold it
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::IoError(format!("Failed to open lock file {}: {}", path.display(), e)))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                info!("Acquired update lock at {}", path.display());
                Ok(LockHandle::new(app_id, FileGuard { file }))
            }
            Err(e) if is_contended(&e) => {
                debug!("Update lock already held at {}", path.display());
                Err(Error::AlreadyInProgress(app_id.to_string()))
            }
            Err(e) => Err(Error::IoError(format!(
                "Failed to try-acquire update lock {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Process-local update lock
///
/// Clones share state, so a clone handed to a second manager contends
/// with the first.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUpdateLock {
    held: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryUpdateLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, app_id: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(app_id)
    }
}

struct MemoryGuard {
    held: Arc<Mutex<HashSet<String>>>,
    app_id: String,
}

impl Drop for MemoryGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.app_id);
    }
}

impl UpdateLock for InMemoryUpdateLock {
    fn try_acquire(&self, app_id: &str) -> Result<LockHandle> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(app_id.to_string()) {
            return Err(Error::AlreadyInProgress(app_id.to_string()));
        }
        debug!("Acquired in-memory update lock for {}", app_id);
        Ok(LockHandle::new(
            app_id,
            MemoryGuard {
                held: Arc::clone(&self.held),
                app_id: app_id.to_string(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_lock_excludes_second_holder() {
        let temp = TempDir::new().unwrap();
        let lock = FileUpdateLock::new(temp.path());

        let guard = lock.try_acquire("My App").unwrap();
        assert_eq!(guard.app_id(), "My App");
        assert!(lock.lock_path("My App").ends_with(".My_App.lock"));
        assert!(lock.is_held("My App"));
        assert!(matches!(
            lock.try_acquire("My App"),
            Err(Error::AlreadyInProgress(_))
        ));

        // Different application ids do not contend
        let _other = lock.try_acquire("Other").unwrap();

        drop(guard);
        assert!(!lock.is_held("My App"));
        assert!(lock.try_acquire("My App").is_ok());
    }

    #[test]
    fn test_memory_lock_released_on_drop() {
        let lock = InMemoryUpdateLock::new();
        let shared = lock.clone();

        let guard = lock.try_acquire("app").unwrap();
        assert!(matches!(shared.try_acquire("app"), Err(Error::AlreadyInProgress(_))));
        drop(guard);
        assert!(!lock.is_held("app"));
        assert!(shared.try_acquire("app").is_ok());
    }

    #[test]
    fn test_memory_lock_released_on_panic() {
        let lock = InMemoryUpdateLock::new();
        let inner = lock.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = inner.try_acquire("app").unwrap();
            panic!("update failed");
        });
        assert!(result.is_err());
        assert!(!lock.is_held("app"));
    }
}

//! Exclusive moves between staging directories
//!
//! Every state transition of a queued item is exactly one
//! [`Arbitrator::move_exclusive`] call. The default [`FileLockArbitrator`]
//! brackets the move with an in-process mutex and an advisory lock on
//! `{root}/.arbitrator.lock`, so a second process sharing the same root never
//! observes an item half-way through a transition.

use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Name of the lock file created in the staging root
pub const LOCK_FILE_NAME: &str = ".arbitrator.lock";

/// Default number of lock retries after the first attempt
pub const DEFAULT_LOCK_RETRIES: u32 = 5;

/// Errors from arbitrated moves
#[derive(Debug, Error)]
pub enum ArbitrationError {
    /// Another process held the lock for the whole backoff window
    #[error("Failed to acquire lock on {lock_path} after {retries} retries")]
    LockTimeout {
        /// Lock file
        lock_path: PathBuf,
        /// Retries attempted
        retries: u32,
    },

    /// The lock file could not be opened or locked
    #[error("Lock error on {lock_path}: {source}")]
    Lock {
        /// Lock file
        lock_path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },

    /// The move itself failed; the source is left in place
    #[error("Failed to move {from} to {to}: {source}")]
    Apply {
        /// Source path
        from: PathBuf,
        /// Destination path
        to: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },
}

impl ArbitrationError {
    /// True when the move failed because its source no longer exists,
    /// i.e. another actor already moved or deleted the item.
    pub fn is_source_missing(&self) -> bool {
        matches!(self, ArbitrationError::Apply { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// The filesystem mutation performed inside the exclusive region
pub type MoveFn<'a> = &'a mut dyn FnMut(&Path, &Path) -> io::Result<()>;

/// Mutual exclusion for moves between staging directories
pub trait Arbitrator: Send + Sync {
    /// Run `apply(from, to)` while no other user of the same mechanism can
    /// observe or mutate either path. Blocking.
    fn move_exclusive(&self, from: &Path, to: &Path, apply: MoveFn<'_>) -> Result<(), ArbitrationError>;
}

/// Rename `from` to `to`, refusing to replace an existing destination.
///
/// A rename is atomic on a single volume, so on failure the source is intact.
pub fn rename_item(from: &Path, to: &Path) -> io::Result<()> {
    if !from.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", from.display()),
        ));
    }
    if to.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        ));
    }
    std::fs::rename(from, to)
}

fn apply_move(from: &Path, to: &Path, apply: MoveFn<'_>) -> Result<(), ArbitrationError> {
    apply(from, to).map_err(|source| ArbitrationError::Apply {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}

/// In-process only arbitration, for roots never shared between processes
#[derive(Debug, Default)]
pub struct LocalArbitrator {
    guard: Mutex<()>,
}

impl LocalArbitrator {
    /// Create a new local arbitrator
    pub fn new() -> Self {
        Self::default()
    }
}

impl Arbitrator for LocalArbitrator {
    fn move_exclusive(&self, from: &Path, to: &Path, apply: MoveFn<'_>) -> Result<(), ArbitrationError> {
        let _held = self.guard.lock();
        apply_move(from, to, apply)
    }
}

/// Arbitration shared with other processes through an advisory file lock
#[derive(Debug)]
pub struct FileLockArbitrator {
    lock_path: PathBuf,
    max_retries: u32,
    guard: Mutex<()>,
}

/// Releases the advisory lock when dropped
struct HeldLock {
    file: File,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!("Failed to release arbitrator lock: {}", e);
        }
    }
}

impl FileLockArbitrator {
    /// Arbitrator locking `{root}/.arbitrator.lock`
    pub fn new(root: &Path) -> Self {
        Self {
            lock_path: root.join(LOCK_FILE_NAME),
            max_retries: DEFAULT_LOCK_RETRIES,
            guard: Mutex::new(()),
        }
    }

    /// Override the number of lock retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Path of the lock file
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Acquire the advisory lock with exponential backoff:
    /// no wait, then 50ms, 100ms, 200ms, 400ms, 800ms.
    fn acquire(&self) -> Result<HeldLock, ArbitrationError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|source| ArbitrationError::Lock {
                lock_path: self.lock_path.clone(),
                source,
            })?;

        for attempt in 0..=self.max_retries {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(HeldLock { file }),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    trace!("Arbitrator lock contended, attempt {}", attempt);
                    if attempt < self.max_retries {
                        std::thread::sleep(Duration::from_millis(50u64 << attempt));
                    }
                }
                Err(source) => {
                    return Err(ArbitrationError::Lock {
                        lock_path: self.lock_path.clone(),
                        source,
                    })
                }
            }
        }

        Err(ArbitrationError::LockTimeout {
            lock_path: self.lock_path.clone(),
            retries: self.max_retries,
        })
    }
}

impl Arbitrator for FileLockArbitrator {
    fn move_exclusive(&self, from: &Path, to: &Path, apply: MoveFn<'_>) -> Result<(), ArbitrationError> {
        let _held = self.guard.lock();
        let _lock = self.acquire()?;
        apply_move(from, to, apply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_rename_item_moves_file() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a.json");
        let to = dir.path().join("b.json");
        std::fs::write(&from, b"payload").unwrap();

        rename_item(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"payload");
    }

    #[test]
    fn test_rename_item_refuses_to_clobber() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a.json");
        let to = dir.path().join("b.json");
        std::fs::write(&from, b"new").unwrap();
        std::fs::write(&to, b"old").unwrap();

        let err = rename_item(&from, &to).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&from).unwrap(), b"new");
        assert_eq!(std::fs::read(&to).unwrap(), b"old");
    }

    #[test]
    fn test_file_lock_arbitrator_moves_and_creates_lock_file() {
        let dir = tempdir().unwrap();
        let arbitrator = FileLockArbitrator::new(dir.path());
        let from = dir.path().join("a.json");
        let to = dir.path().join("b.json");
        std::fs::write(&from, b"x").unwrap();

        arbitrator.move_exclusive(&from, &to, &mut rename_item).unwrap();

        assert!(to.exists());
        assert!(arbitrator.lock_path().exists());
    }

    #[test]
    fn test_missing_source_is_reported_as_such() {
        let dir = tempdir().unwrap();
        let arbitrator = LocalArbitrator::new();
        let from = dir.path().join("gone.json");
        let to = dir.path().join("b.json");

        let err = arbitrator.move_exclusive(&from, &to, &mut rename_item).unwrap_err();
        assert!(err.is_source_missing());
    }

    #[test]
    fn test_failed_apply_leaves_source_intact() {
        let dir = tempdir().unwrap();
        let arbitrator = FileLockArbitrator::new(dir.path());
        let from = dir.path().join("a.json");
        let to = dir.path().join("b.json");
        std::fs::write(&from, b"x").unwrap();

        let err = arbitrator
            .move_exclusive(&from, &to, &mut |_, _| {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            })
            .unwrap_err();

        assert!(matches!(err, ArbitrationError::Apply { .. }));
        assert!(!err.is_source_missing());
        assert!(from.exists());
    }

    #[test]
    fn test_lock_held_elsewhere_times_out() {
        let dir = tempdir().unwrap();
        let arbitrator = FileLockArbitrator::new(dir.path()).with_max_retries(1);

        // Another holder, as a second process would be
        let other = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(arbitrator.lock_path())
            .unwrap();
        other.lock_exclusive().unwrap();

        let mut called = false;
        let result = arbitrator.move_exclusive(Path::new("a"), Path::new("b"), &mut |_, _| {
            called = true;
            Ok(())
        });

        assert!(matches!(result, Err(ArbitrationError::LockTimeout { retries: 1, .. })));
        assert!(!called);
        other.unlock().unwrap();
    }

    #[test]
    fn test_concurrent_movers_move_each_item_once() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&dst).unwrap();
        for i in 0..20 {
            std::fs::write(src.join(format!("{}.json", i)), b"x").unwrap();
        }

        let arbitrator = Arc::new(FileLockArbitrator::new(dir.path()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let arbitrator = Arc::clone(&arbitrator);
            let src = src.clone();
            let dst = dst.clone();
            handles.push(std::thread::spawn(move || {
                let mut moved = 0;
                for i in 0..20 {
                    let name = format!("{}.json", i);
                    if arbitrator
                        .move_exclusive(&src.join(&name), &dst.join(&name), &mut rename_item)
                        .is_ok()
                    {
                        moved += 1;
                    }
                }
                moved
            }));
        }

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 20);
        assert_eq!(std::fs::read_dir(&dst).unwrap().count(), 20);
    }
}

//! Singleton run guard
//!
//! At most one janitor pass may run system-wide. The guard takes an
//! exclusive, non-blocking advisory lock on a well-known file, records the
//! holder's pid in it, and on every exit path releases the lock and removes
//! the file.
//!
//! The lock serializes pass *execution* only. Producers writing into the work
//! tree never take it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

/// Guard result type
pub type GuardResult<T> = Result<T, GuardError>;

/// How many times to retry when the lock file is swapped underneath us
const MAX_ACQUIRE_ATTEMPTS: u32 = 5;

/// Errors from lock acquisition
#[derive(Debug, Error)]
pub enum GuardError {
    /// Another pass holds the lock. Not a failure: report and exit.
    #[error("another pass is already running (lock {path}{})", holder_suffix(.holder_pid))]
    Contention {
        path: PathBuf,
        holder_pid: Option<u32>,
    },

    #[error("lock I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn holder_suffix(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!(", held by pid {}", pid),
        None => String::new(),
    }
}

impl GuardError {
    pub fn is_contention(&self) -> bool {
        matches!(self, GuardError::Contention { .. })
    }

    fn io(path: &Path, source: io::Error) -> Self {
        GuardError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An acquired exclusive lock. Released and removed on drop.
#[derive(Debug)]
pub struct ExclusiveLock {
    lock_path: PathBuf,
    /// Taken on drop so non-unix targets can close it before unlinking
    lock_file: Option<File>,
}

impl ExclusiveLock {
    /// Try once to take the lock at `lock_path` without waiting.
    ///
    /// Creates parent directories and the file if absent. On success the
    /// file holds `"<pid>\n"`.
    pub fn try_acquire(lock_path: &Path) -> GuardResult<Self> {
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| GuardError::io(parent, e))?;
        }

        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let file = match open_exclusive(lock_path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(GuardError::Contention {
                        path: lock_path.to_path_buf(),
                        holder_pid: read_holder_pid(lock_path),
                    });
                }
                Err(e) => return Err(GuardError::io(lock_path, e)),
            };

            // A releasing holder unlinks the file; if it did so between our
            // open and our flock we hold a lock on an orphaned inode.
            if !still_linked(&file, lock_path) {
                debug!(attempt, path = %lock_path.display(), "lock file replaced during acquisition, retrying");
                continue;
            }

            let mut lock = Self {
                lock_path: lock_path.to_path_buf(),
                lock_file: Some(file),
            };
            lock.write_pid().map_err(|e| GuardError::io(lock_path, e))?;
            debug!(path = %lock_path.display(), pid = std::process::id(), "lock acquired");
            return Ok(lock);
        }

        Err(GuardError::Contention {
            path: lock_path.to_path_buf(),
            holder_pid: read_holder_pid(lock_path),
        })
    }

    /// Get the lock file path.
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    fn write_pid(&mut self) -> io::Result<()> {
        let Some(file) = self.lock_file.as_mut() else {
            return Ok(());
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        if let Some(file) = self.lock_file.take() {
            release(file, &self.lock_path);
        }
        debug!(path = %self.lock_path.display(), "lock released");
    }
}

/// Runs closures under the singleton lock at a fixed path
#[derive(Debug, Clone)]
pub struct RunGuard {
    lock_path: PathBuf,
}

impl RunGuard {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: lock_path.into(),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Run `f` while holding the lock.
    ///
    /// Returns `GuardError::Contention` without running `f` if another
    /// holder exists. The lock is released and the file removed however `f`
    /// returns, including by panic unwinding.
    pub fn run_exclusive<T, F>(&self, f: F) -> GuardResult<T>
    where
        F: FnOnce() -> T,
    {
        let lock = ExclusiveLock::try_acquire(&self.lock_path)?;
        info!(path = %lock.path().display(), "acquired janitor lock");
        let result = f();
        drop(lock);
        Ok(result)
    }
}

fn read_holder_pid(lock_path: &Path) -> Option<u32> {
    fs::read_to_string(lock_path).ok()?.trim().parse().ok()
}

/// Open `lock_path` and take a non-blocking exclusive flock on it.
///
/// Fails with `WouldBlock` when another descriptor holds the lock.
#[cfg(unix)]
fn open_exclusive(lock_path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(lock_path)?;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        Ok(file)
    } else {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        } else {
            Err(err)
        }
    }
}

/// Unlink while still holding the flock so no contender can lock the old
/// inode after it is released.
#[cfg(unix)]
fn release(file: File, lock_path: &Path) {
    use std::os::unix::io::AsRawFd;

    let _ = fs::remove_file(lock_path);
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(unix)]
fn still_linked(file: &File, lock_path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(lock_path)) {
        (Ok(held), Ok(on_disk)) => held.dev() == on_disk.dev() && held.ino() == on_disk.ino(),
        _ => false,
    }
}

/// Without flock the file's existence is the lock: whoever creates it holds
/// it until drop removes it.
#[cfg(not(unix))]
fn open_exclusive(lock_path: &Path) -> io::Result<File> {
    match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        }
        Err(e) => Err(e),
    }
}

/// The handle must be closed before the file can be removed.
#[cfg(not(unix))]
fn release(file: File, lock_path: &Path) {
    drop(file);
    let _ = fs::remove_file(lock_path);
}

#[cfg(not(unix))]
fn still_linked(_file: &File, _lock_path: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_lock_writes_pid() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("janitor.lock");

        let lock = ExclusiveLock::try_acquire(&lock_path).unwrap();
        let content = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content, format!("{}\n", std::process::id()));
    }

    #[test]
    fn test_lock_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("nested").join("run").join("janitor.lock");

        let _lock = ExclusiveLock::try_acquire(&lock_path).unwrap();
        assert!(lock_path.exists());
    }

    #[test]
    fn test_lock_removed_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("janitor.lock");

        {
            let _lock = ExclusiveLock::try_acquire(&lock_path).unwrap();
            assert!(lock_path.exists());
        }

        assert!(!lock_path.exists());
        let _again = ExclusiveLock::try_acquire(&lock_path).unwrap();
    }

    #[test]
    fn test_contention_reports_holder() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("janitor.lock");

        let _held = ExclusiveLock::try_acquire(&lock_path).unwrap();
        let err = ExclusiveLock::try_acquire(&lock_path).unwrap_err();

        assert!(err.is_contention());
        match err {
            GuardError::Contention { holder_pid, .. } => {
                assert_eq!(holder_pid, Some(std::process::id()));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The loser must not have clobbered the holder's pid.
        assert_eq!(
            fs::read_to_string(&lock_path).unwrap(),
            format!("{}\n", std::process::id())
        );
    }

    #[test]
    fn test_run_exclusive_skips_closure_on_contention() {
        let temp_dir = TempDir::new().unwrap();
        let guard = RunGuard::new(temp_dir.path().join("janitor.lock"));

        let _held = ExclusiveLock::try_acquire(guard.lock_path()).unwrap();
        let mut ran = false;
        let result = guard.run_exclusive(|| ran = true);

        assert!(result.unwrap_err().is_contention());
        assert!(!ran);
    }

    #[test]
    fn test_run_exclusive_releases_after_error_result() {
        let temp_dir = TempDir::new().unwrap();
        let guard = RunGuard::new(temp_dir.path().join("janitor.lock"));

        let outcome: Result<(), String> = guard
            .run_exclusive(|| Err("pass failed".to_string()))
            .unwrap();
        assert!(outcome.is_err());
        assert!(!guard.lock_path().exists());

        assert_eq!(guard.run_exclusive(|| 7).unwrap(), 7);
    }

    #[test]
    fn test_run_exclusive_releases_after_panic() {
        let temp_dir = TempDir::new().unwrap();
        let guard = RunGuard::new(temp_dir.path().join("janitor.lock"));

        let g = guard.clone();
        let panicked = thread::spawn(move || {
            let _ = g.run_exclusive(|| panic!("boom"));
        })
        .join();
        assert!(panicked.is_err());

        assert!(!guard.lock_path().exists());
        assert!(guard.run_exclusive(|| ()).is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn test_concurrent_attempts_run_one_at_a_time() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("janitor.lock");
        let attempts = 8;

        let barrier = Arc::new(Barrier::new(attempts));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicUsize::new(0));
        let contended = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..attempts)
            .map(|_| {
                let guard = RunGuard::new(lock_path.clone());
                let barrier = Arc::clone(&barrier);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                let executed = Arc::clone(&executed);
                let contended = Arc::clone(&contended);
                thread::spawn(move || {
                    barrier.wait();
                    let result = guard.run_exclusive(|| {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                    match result {
                        Ok(()) => executed.fetch_add(1, Ordering::SeqCst),
                        Err(e) => {
                            assert!(e.is_contention(), "unexpected error: {e}");
                            contended.fetch_add(1, Ordering::SeqCst)
                        }
                    };
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(executed.load(Ordering::SeqCst) >= 1);
        assert_eq!(
            executed.load(Ordering::SeqCst) + contended.load(Ordering::SeqCst),
            attempts
        );
        assert!(!lock_path.exists());
    }
}

//! Per-entry advisory file lock.
//!
//! The lock is a flock on a `.lock` file that is never unlinked. The kernel
//! releases it when the holder exits, so a crashed holder never blocks anyone.
//! The file also records its holder (`pid host unix_secs`) so a waiter can
//! report who it is waiting for and warn when a lock is held too long.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("io error on lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("gave up waiting for lock {path} after {waited:?}")]
    Timeout { path: PathBuf, waited: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub poll: Duration,
    /// Warn when the lock has been held longer than this.
    pub stale_after: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(crate::constants::DEFAULT_LOCK_POLL_MS),
            stale_after: None,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LockOwner {
    pub pid: u32,
    pub host: String,
    pub since_unix: u64,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            host: hostname(),
            since_unix: unix_now(),
        }
    }

    fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let pid = parts.next()?.parse().ok()?;
        let host = parts.next()?.to_string();
        let since_unix = parts.next()?.parse().ok()?;
        Some(Self { pid, host, since_unix })
    }

    fn render(&self) -> String {
        format!("{} {} {}\n", self.pid, self.host, self.since_unix)
    }

    /// Held for longer than `stale_after`.
    fn is_stale(&self, stale_after: Duration) -> bool {
        unix_now().saturating_sub(self.since_unix) >= stale_after.as_secs()
    }

    /// Recorded holder is a process on this host that no longer exists. While the
    /// flock is contended this only means the new holder has not written its record yet.
    fn is_outdated(&self) -> bool {
        self.host == hostname() && !process_alive(self.pid)
    }
}

/// Exclusive lock; released when dropped.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    /// Block until the lock at `path` is held by this guard.
    pub fn acquire(path: &Path, options: &LockOptions) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let started = Instant::now();
        let mut reported = false;
        let mut warned_stale = false;

        loop {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .map_err(io_err)?;

            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    // the path was replaced after we opened it; lock the file now there
                    if !still_linked(&file, path).map_err(io_err)? {
                        drop(file);
                        continue;
                    }
                    file.set_len(0).map_err(io_err)?;
                    file.seek(SeekFrom::Start(0)).map_err(io_err)?;
                    file.write_all(LockOwner::current().render().as_bytes())
                        .map_err(io_err)?;
                    file.flush().map_err(io_err)?;
                    debug!(lock = %path.display(), "lock acquired");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                    // the kernel drops a flock when its holder dies, so a contended
                    // lock always has a live holder; the record is only diagnostics
                    let owner = read_owner(&mut file);
                    if !reported {
                        debug!(lock = %path.display(), ?owner, "waiting for lock");
                        reported = true;
                    }
                    if let (Some(stale_after), Some(owner)) = (options.stale_after, &owner) {
                        if !warned_stale && !owner.is_outdated() && owner.is_stale(stale_after) {
                            warn!(lock = %path.display(), ?owner, "lock held longer than expected");
                            warned_stale = true;
                        }
                    }
                }
                Err(err) => return Err(io_err(err)),
            }

            if let Some(timeout) = options.timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(LockError::Timeout {
                        path: path.to_path_buf(),
                        waited,
                    });
                }
            }
            thread::sleep(options.poll);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), %err, "failed to release lock");
        }
    }
}

/// Whether `file` is still the file at `path`.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}

fn read_owner(file: &mut File) -> Option<LockOwner> {
    let mut text = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut text).ok()?;
    LockOwner::parse(&text)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn hostname() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .find_map(|p| fs::read_to_string(p).ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Liveness check through procfs; without procfs every process counts as alive.
fn process_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    !proc_root.is_dir() || proc_root.join(pid.to_string()).exists()
}

//! Advisory exclusive locking for the run lifecycle and per-repo execution.
//!
//! Two kinds of lock share this mechanism: the run-lifecycle lock
//! (`<cache>/run.lock`) and per-repo execution locks
//! (`<cache>/repo_locks/<repo_id>.lock`). Both are acquired the same way:
//! `O_CREAT | O_EXCL` so two racing processes have exactly one winner, with
//! PID+timestamp metadata written inside for diagnostics and stale-lock
//! recovery.
//!
//! An in-process guard (a process-wide registry behind a mutex) additionally
//! prevents the same process from re-entering a lock path it already holds —
//! acquisition is single-threaded ownership within one process, never
//! re-entrant.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata written inside a held lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMetadata {
    pub pid: u32,
    pub locked_at: DateTime<Utc>,
}

/// Outcome of a non-blocking acquisition attempt.
#[derive(Debug)]
pub enum AcquireOutcome {
    /// We created the lock file — we own it.
    Acquired(ExclusiveLock),
    /// Another live process holds it.
    Busy(LockMetadata),
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock busy: held by pid {0}")]
    Busy(u32),
    #[error("this process already holds the lock at {0}")]
    AlreadyHeldByThisProcess(PathBuf),
    #[error("io error acquiring lock at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A held exclusive lock. Releases on drop, on every exit path.
#[derive(Debug)]
pub struct ExclusiveLock {
    path: PathBuf,
    released: bool,
}

impl ExclusiveLock {
    /// Attempt non-blocking exclusive acquisition of `path`.
    ///
    /// Stale locks (holder PID no longer alive) are removed automatically
    /// and acquisition is retried once.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if GUARD.is_held_by_this_process(path) {
            return Err(LockError::AlreadyHeldByThisProcess(path.to_path_buf()));
        }

        for attempt in 0..2 {
            match try_create(path) {
                Ok(()) => {
                    GUARD.mark_held(path);
                    return Ok(ExclusiveLock {
                        path: path.to_path_buf(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match read_metadata(path) {
                        Some(meta) if pid_alive(meta.pid) => {
                            return Err(LockError::Busy(meta.pid));
                        }
                        _ => {
                            tracing::info!(path = %path.display(), "removing stale lock file");
                            let _ = std::fs::remove_file(path);
                            if attempt == 1 {
                                return Err(LockError::Io {
                                    path: path.to_path_buf(),
                                    source: std::io::Error::new(
                                        std::io::ErrorKind::AlreadyExists,
                                        "stale lock could not be cleared",
                                    ),
                                });
                            }
                            continue;
                        }
                    }
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
        unreachable!("loop always returns")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock explicitly. Also happens automatically on drop.
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if self.released {
            return;
        }
        let _ = std::fs::remove_file(&self.path);
        GUARD.mark_released(&self.path);
        self.released = true;
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        self.do_release();
    }
}

fn try_create(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let meta = LockMetadata {
        pid: std::process::id(),
        locked_at: Utc::now(),
    };
    let json = serde_json::to_string_pretty(&meta)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true) // O_CREAT | O_EXCL
        .open(path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn read_metadata(path: &Path) -> Option<LockMetadata> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
pub(crate) fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 checks existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub(crate) fn pid_alive(_pid: u32) -> bool {
    true
}

// ---------------------------------------------------------------------------
// In-process guard registry
// ---------------------------------------------------------------------------

struct InProcessGuard {
    held: Mutex<HashSet<PathBuf>>,
}

impl InProcessGuard {
    fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
        }
    }

    fn is_held_by_this_process(&self, path: &Path) -> bool {
        self.held.lock().expect("lock poisoned").contains(path)
    }

    fn mark_held(&self, path: &Path) {
        self.held
            .lock()
            .expect("lock poisoned")
            .insert(path.to_path_buf());
    }

    fn mark_released(&self, path: &Path) {
        self.held.lock().expect("lock poisoned").remove(path);
    }
}

static GUARD: LazyLock<InProcessGuard> = LazyLock::new(InProcessGuard::new);

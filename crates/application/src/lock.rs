use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// A lock file without a readable pid is only considered abandoned after
/// this long; its owner may still be writing it.
const UNREADABLE_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum LockError {
    #[error("{path} is held by pid {pid:?}")]
    Busy { path: PathBuf, pid: Option<i32> },
    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive run lock: a file holding the owner's pid, removed on drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Retries until `timeout` elapses. Locks left by dead processes are
    /// taken over.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let deadline = Instant::now() + timeout;
        loop {
            match Self::try_acquire(path) {
                Err(LockError::Busy { pid, .. }) if Instant::now() < deadline => {
                    debug!(path = %path.display(), ?pid, "run lock busy, waiting");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                other => return other,
            }
        }
    }

    pub fn try_acquire(path: &Path) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id()).map_err(io_err)?;
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    let holder = read_pid(path);
                    if !is_stale(path, holder) {
                        return Err(LockError::Busy {
                            path: path.to_path_buf(),
                            pid: holder,
                        });
                    }
                    warn!(path = %path.display(), pid = ?holder, "removing stale run lock");
                    match std::fs::remove_file(path) {
                        Ok(()) => {}
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                        Err(err) => return Err(io_err(err)),
                    }
                }
                Err(err) => return Err(io_err(err)),
            }
        }
        Err(LockError::Busy {
            path: path.to_path_buf(),
            pid: read_pid(path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "cannot release run lock");
        }
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_stale(path: &Path, holder: Option<i32>) -> bool {
    match holder {
        Some(pid) => !process_alive(pid),
        None => std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .map_or(false, |age| age > UNREADABLE_GRACE),
    }
}

fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 only checks that the pid exists and may be signalled.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

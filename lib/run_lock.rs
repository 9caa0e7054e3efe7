use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use thiserror::Error;

pub const DEFAULT_LOCK_FILE: &str = "namesync.lock";
/// Age after which a held lock is reported as stale.
pub const STALE_AFTER: Duration = Duration::from_secs(3600);
pub const DEBUG_STALE_AFTER: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock {path} is held by another run ({holder})")]
    Held { path: PathBuf, holder: String },
    #[error("lock {path} is held by a run that stopped refreshing it {age:?} ago ({holder})")]
    Stale {
        path: PathBuf,
        holder: String,
        age: Duration,
    },
    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive advisory lock on a file, released when dropped.
///
/// The holder writes its pid and a timestamp into the file and rewrites them on every
/// [`RunLock::refresh`], so the file's mtime shows how recently the holder was alive.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Takes the lock without blocking.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| io_error(path, source))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                return Err(held_error(path, &file, stale_after));
            }
            Err(err) => return Err(io_error(path, err)),
        }

        let lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.refresh()?;
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the holder line, bumping the file's mtime.
    pub fn refresh(&self) -> Result<(), LockError> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or_default();

        write_holder(&self.file, stamp).map_err(|source| io_error(&self.path, source))
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn write_holder(mut file: &File, stamp: u64) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "pid={} refreshed_at={stamp}", process::id())?;
    file.flush()
}

fn held_error(path: &Path, file: &File, stale_after: Duration) -> LockError {
    let holder = fs::read_to_string(path)
        .map(|contents| contents.trim().to_string())
        .ok()
        .filter(|contents| !contents.is_empty())
        .unwrap_or_else(|| "unknown holder".to_string());
    let age = file
        .metadata()
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok());

    match age {
        Some(age) if age > stale_after => LockError::Stale {
            path: path.to_path_buf(),
            holder,
            age,
        },
        _ => LockError::Held {
            path: path.to_path_buf(),
            holder,
        },
    }
}

fn io_error(path: &Path, source: io::Error) -> LockError {
    LockError::Io {
        path: path.to_path_buf(),
        source,
    }
}

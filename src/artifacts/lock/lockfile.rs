//! Exclusive write locks with commit/rollback
//!
//! Every named-file write goes through a sibling `.lock` file: the lock is
//! created with create+exclusive, content is staged into it, and `commit`
//! publishes it by renaming over the target. `rollback` discards the staged
//! content. The check-and-store of reference compare-and-swap is serialized
//! against competing writers by holding the lock across both steps.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the lock discipline
///
/// Callers match on these to decide whether to retry (`MissingParent` after
/// a `mkdir_p`), to report contention (`Denied`), or to flag a programming
/// error (`Stale`).
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Unable to create {0}: file exists")]
    Denied(PathBuf),
    #[error("Missing parent directory for lock file {0}")]
    MissingParent(PathBuf),
    #[error("Permission denied creating lock file {0}")]
    NoPermission(PathBuf),
    #[error("Lock on {0} used after commit or rollback")]
    Stale(PathBuf),
    #[error("IO failure on lock file {0}: {1}")]
    Io(PathBuf, #[source] io::Error),
}

/// An exclusive write lock on a named file
///
/// The staged content becomes visible atomically on `commit`; readers never
/// observe a partial write and never take locks themselves.
#[derive(Debug)]
pub struct Lockfile {
    file_path: PathBuf,
    lock_path: PathBuf,
    lock: Option<File>,
}

impl Lockfile {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let lock_path = file_path.with_extension(match file_path.extension() {
            Some(ext) => format!("{}.lock", ext.to_string_lossy()),
            None => "lock".to_string(),
        });

        Lockfile {
            file_path,
            lock_path,
            lock: None,
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Acquire the lock by creating `<path>.lock` with create+exclusive
    ///
    /// Idempotent while held.
    pub fn hold_for_update(&mut self) -> Result<(), LockError> {
        if self.lock.is_some() {
            return Ok(());
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(file) => {
                self.lock = Some(file);
                Ok(())
            }
            Err(err) => Err(match err.kind() {
                io::ErrorKind::AlreadyExists => LockError::Denied(self.lock_path.clone()),
                io::ErrorKind::NotFound => LockError::MissingParent(self.lock_path.clone()),
                io::ErrorKind::PermissionDenied => {
                    LockError::NoPermission(self.lock_path.clone())
                }
                _ => LockError::Io(self.lock_path.clone(), err),
            }),
        }
    }

    /// Stage bytes into the lock file
    pub fn write(&mut self, data: &[u8]) -> Result<(), LockError> {
        if self.lock.is_none() {
            return Err(self.stale());
        }

        let file = self.lock.as_mut().unwrap();
        file.write_all(data)
            .map_err(|err| LockError::Io(self.lock_path.clone(), err))
    }

    /// Publish the staged content by renaming the lock over the target
    pub fn commit(&mut self) -> Result<(), LockError> {
        let file = self.lock.take().ok_or_else(|| self.stale())?;
        drop(file);

        std::fs::rename(&self.lock_path, &self.file_path)
            .map_err(|err| LockError::Io(self.lock_path.clone(), err))
    }

    /// Discard the staged content and release the lock
    pub fn rollback(&mut self) -> Result<(), LockError> {
        let file = self.lock.take().ok_or_else(|| self.stale())?;
        drop(file);

        std::fs::remove_file(&self.lock_path)
            .map_err(|err| LockError::Io(self.lock_path.clone(), err))
    }

    pub fn is_held(&self) -> bool {
        self.lock.is_some()
    }

    /// Read the current committed value of the locked file, if any
    ///
    /// Used by compare-and-swap while the lock is held.
    pub fn read_committed(&self) -> Result<Option<Vec<u8>>, LockError> {
        match std::fs::read(&self.file_path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LockError::Io(self.file_path.clone(), err)),
        }
    }

    /// Remove the committed file while holding the lock (ref deletion)
    pub fn delete_target(&mut self) -> Result<(), LockError> {
        if self.lock.is_none() {
            return Err(self.stale());
        }

        match std::fs::remove_file(&self.file_path) {
            Ok(()) => self.rollback(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => self.rollback(),
            Err(err) => Err(LockError::Io(self.file_path.clone(), err)),
        }
    }

    fn stale(&self) -> LockError {
        LockError::Stale(self.lock_path.clone())
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        // A dropped holder abandons the operation
        if self.lock.take().is_some() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

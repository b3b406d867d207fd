//! Pending-commit state
//!
//! A multi-step operation (merge, cherry-pick, revert) that stops on
//! conflicts records what it was doing in `MERGE_HEAD` /
//! `CHERRY_PICK_HEAD` / `REVERT_HEAD` plus `MERGE_MSG`, so a later
//! `--continue` or `--abort` can recover. The head file is created with the
//! exclusive flag so two merges cannot race to start.

use crate::artifacts::objects::object_id::ObjectId;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which multi-step operation is pending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Merge,
    CherryPick,
    Revert,
}

impl PendingKind {
    pub fn head_file(&self) -> &'static str {
        match self {
            PendingKind::Merge => "MERGE_HEAD",
            PendingKind::CherryPick => "CHERRY_PICK_HEAD",
            PendingKind::Revert => "REVERT_HEAD",
        }
    }
}

#[derive(Debug, Error)]
pub enum PendingCommitError {
    #[error("A {0} is already in progress")]
    InProgress(&'static str),
    #[error("There is no merge in progress ({0} missing)")]
    NotInProgress(&'static str),
    #[error("IO failure on pending-commit file {0}: {1}")]
    Io(PathBuf, #[source] io::Error),
}

const MESSAGE_FILE: &str = "MERGE_MSG";

/// The pending-commit files below `.git`
#[derive(Debug)]
pub struct PendingCommit {
    path: PathBuf,
}

impl PendingCommit {
    pub fn new(git_path: &Path) -> Self {
        PendingCommit {
            path: git_path.to_path_buf(),
        }
    }

    /// Record the start of a pending operation
    ///
    /// Fails if one is already in progress.
    pub fn start(
        &self,
        oid: &ObjectId,
        kind: PendingKind,
        message: &str,
    ) -> Result<(), PendingCommitError> {
        let head_path = self.path.join(kind.head_file());

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&head_path)
            .map_err(|err| match err.kind() {
                io::ErrorKind::AlreadyExists => PendingCommitError::InProgress(kind.head_file()),
                _ => PendingCommitError::Io(head_path.clone(), err),
            })?;
        file.write_all(format!("{}\n", oid.as_ref()).as_bytes())
            .map_err(|err| PendingCommitError::Io(head_path.clone(), err))?;

        let message_path = self.path.join(MESSAGE_FILE);
        std::fs::write(&message_path, message)
            .map_err(|err| PendingCommitError::Io(message_path, err))?;

        Ok(())
    }

    /// Whether any pending operation is recorded
    pub fn in_progress(&self) -> bool {
        self.current_kind().is_some()
    }

    pub fn current_kind(&self) -> Option<PendingKind> {
        [
            PendingKind::Merge,
            PendingKind::CherryPick,
            PendingKind::Revert,
        ]
        .into_iter()
        .find(|kind| self.path.join(kind.head_file()).exists())
    }

    /// The commit recorded for the pending operation
    pub fn merge_oid(&self, kind: PendingKind) -> anyhow::Result<ObjectId> {
        let head_path = self.path.join(kind.head_file());

        let content = std::fs::read_to_string(&head_path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => {
                anyhow::Error::from(PendingCommitError::NotInProgress(kind.head_file()))
            }
            _ => anyhow::Error::from(PendingCommitError::Io(head_path.clone(), err)),
        })?;

        ObjectId::try_parse(content.trim().to_string())
    }

    pub fn merge_message(&self) -> anyhow::Result<String> {
        Ok(std::fs::read_to_string(self.path.join(MESSAGE_FILE))?)
    }

    /// Clear the pending state after a commit or an abort
    pub fn clear(&self, kind: PendingKind) -> Result<(), PendingCommitError> {
        let head_path = self.path.join(kind.head_file());

        std::fs::remove_file(&head_path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => PendingCommitError::NotInProgress(kind.head_file()),
            _ => PendingCommitError::Io(head_path.clone(), err),
        })?;

        let message_path = self.path.join(MESSAGE_FILE);
        if let Err(err) = std::fs::remove_file(&message_path)
            && err.kind() != io::ErrorKind::NotFound
        {
            return Err(PendingCommitError::Io(message_path, err));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;

    fn oid() -> ObjectId {
        ObjectId::try_parse("ab".repeat(20)).unwrap()
    }

    #[test]
    fn test_start_records_head_and_message() {
        let dir = TempDir::new().unwrap();
        let pending = PendingCommit::new(dir.path());

        pending
            .start(&oid(), PendingKind::Merge, "merge topic\n")
            .unwrap();

        assert!(pending.in_progress());
        assert_eq!(pending.merge_oid(PendingKind::Merge).unwrap(), oid());
        assert_eq!(pending.merge_message().unwrap(), "merge topic\n");
    }

    #[test]
    fn test_two_starts_cannot_race() {
        let dir = TempDir::new().unwrap();
        let pending = PendingCommit::new(dir.path());

        pending.start(&oid(), PendingKind::Merge, "m").unwrap();
        let second = pending.start(&oid(), PendingKind::Merge, "m");

        assert!(matches!(second, Err(PendingCommitError::InProgress(_))));
    }

    #[test]
    fn test_clear_without_pending_operation_fails() {
        let dir = TempDir::new().unwrap();
        let pending = PendingCommit::new(dir.path());

        assert!(matches!(
            pending.clear(PendingKind::Merge),
            Err(PendingCommitError::NotInProgress("MERGE_HEAD"))
        ));
    }

    #[test]
    fn test_clear_removes_state() {
        let dir = TempDir::new().unwrap();
        let pending = PendingCommit::new(dir.path());

        pending.start(&oid(), PendingKind::Merge, "m").unwrap();
        pending.clear(PendingKind::Merge).unwrap();

        assert!(!pending.in_progress());
    }
}

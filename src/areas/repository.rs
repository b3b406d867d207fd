//! Repository facade
//!
//! Wires the stores together over a `.git` directory and owns the layout:
//!
//! ```text
//! .git/
//!   HEAD                  "ref: refs/heads/<name>\n" or "<oid>\n"
//!   ORIG_HEAD             set by destructive operations
//!   MERGE_HEAD / CHERRY_PICK_HEAD / REVERT_HEAD, MERGE_MSG
//!   index
//!   objects/ (loose + pack/)
//!   refs/heads, refs/remotes
//! ```

use crate::areas::database::Database;
use crate::areas::index::Index;
use crate::areas::refs::Refs;
use crate::areas::workspace::Workspace;
use crate::artifacts::branch::branch_name::DEFAULT_BRANCH;
use crate::artifacts::merge::pending_commit::PendingCommit;
use std::cell::{Ref, RefCell, RefMut};
use std::path::{Path, PathBuf};

/// Repository metadata directory name
const GIT_DIR: &str = ".git";

/// Object database directory name
const DATABASE_DIR: &str = "objects";

/// Index file name
const INDEX_FILE: &str = "index";

/// A repository rooted at a working-tree directory
pub struct Repository {
    /// Repository root path
    path: Box<Path>,
    /// The `.git` directory
    git_path: Box<Path>,
    /// Staging index
    index: RefCell<Index>,
    /// Object database
    database: Database,
    /// Working directory
    workspace: Workspace,
    /// Reference store
    refs: Refs,
}

impl Repository {
    /// Open a repository at (or create the directory for) the given root
    pub fn new(path: PathBuf) -> anyhow::Result<Self> {
        if !path.exists() {
            std::fs::create_dir_all(&path)?;
        }
        let path = path.canonicalize()?;
        let git_path = path.join(GIT_DIR);

        let index = Index::new(git_path.join(INDEX_FILE).into_boxed_path());
        let database = Database::new(git_path.join(DATABASE_DIR).into_boxed_path());
        let workspace = Workspace::new(path.clone().into_boxed_path());
        let refs = Refs::new(git_path.clone().into_boxed_path());

        Ok(Repository {
            path: path.into_boxed_path(),
            git_path: git_path.into_boxed_path(),
            index: RefCell::new(index),
            database,
            workspace,
            refs,
        })
    }

    /// Create the on-disk layout for a fresh repository
    ///
    /// `HEAD` points at the default branch, which does not exist yet.
    pub fn init(&self) -> anyhow::Result<()> {
        for dir in ["objects", "objects/pack", "refs", "refs/heads", "refs/remotes"] {
            std::fs::create_dir_all(self.git_path.join(dir))?;
        }

        let head = self.refs.head_path();
        if !head.exists() {
            std::fs::write(&head, format!("ref: refs/heads/{}\n", DEFAULT_BRANCH))?;
        }

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn git_path(&self) -> &Path {
        &self.git_path
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn refs(&self) -> &Refs {
        &self.refs
    }

    pub fn index(&self) -> Ref<'_, Index> {
        self.index.borrow()
    }

    pub fn index_mut(&self) -> RefMut<'_, Index> {
        self.index.borrow_mut()
    }

    pub fn pending_commit(&self) -> PendingCommit {
        PendingCommit::new(&self.git_path)
    }
}

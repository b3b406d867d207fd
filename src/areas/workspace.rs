//! Working-tree access
//!
//! File listing, stat plumbing and the filesystem half of a migration.
//! Paths given to and returned from this module are relative to the
//! repository root.

use crate::artifacts::checkout::migration::{ActionType, Migration};
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::index::index_entry::EntryMetadata;
use bytes::Bytes;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IGNORED_PATHS: [&str; 3] = [".git", ".", ".."];

#[derive(Debug)]
pub struct Workspace {
    path: Box<Path>,
}

impl Workspace {
    pub fn new(path: Box<Path>) -> Self {
        Workspace { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a relative path exists in the working tree
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        !Self::is_ignored(path) && self.path.join(path).exists()
    }

    /// List the entries of a directory with their stat data
    pub fn list_dir(
        &self,
        dir_path: Option<&Path>,
    ) -> anyhow::Result<Vec<(PathBuf, EntryMetadata)>> {
        let dir_path = match dir_path {
            Some(p) => self.path.join(p),
            None => self.path.to_path_buf(),
        };

        if !dir_path.is_dir() {
            anyhow::bail!("The specified path is not a directory: {:?}", dir_path);
        }

        let mut items = Vec::new();
        for entry in std::fs::read_dir(&dir_path)? {
            let entry = entry?;
            let Some(relative) = self.check_if_not_ignored_path(&entry.path()) else {
                continue;
            };
            let stat = self.stat_file(&relative)?;
            items.push((relative, stat));
        }

        Ok(items)
    }

    /// List all files below a path (or the whole tree), repository-relative
    pub fn list_files(&self, root_file_path: Option<PathBuf>) -> anyhow::Result<Vec<PathBuf>> {
        let root_file_path = match root_file_path {
            Some(p) => self.path.join(p),
            None => self.path.to_path_buf(),
        };

        if !root_file_path.exists() {
            anyhow::bail!("The specified path does not exist: {:?}", root_file_path);
        }

        if root_file_path.is_dir() {
            Ok(WalkDir::new(&root_file_path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| self.check_if_not_ignored_file_path(entry.path()))
                .collect::<Vec<_>>())
        } else {
            Ok(vec![
                root_file_path
                    .strip_prefix(self.path.as_ref())
                    .map(PathBuf::from)
                    .unwrap_or_default(),
            ])
        }
    }

    fn is_ignored(path: &Path) -> bool {
        path.components().any(|component| {
            if let std::path::Component::Normal(name) = component {
                let name_str = name.to_string_lossy();
                IGNORED_PATHS.contains(&name_str.as_ref())
            } else {
                false
            }
        })
    }

    fn check_if_not_ignored_path(&self, path: &Path) -> Option<PathBuf> {
        if !Self::is_ignored(path) {
            Some(path.strip_prefix(self.path.as_ref()).ok()?.to_path_buf())
        } else {
            None
        }
    }

    fn check_if_not_ignored_file_path(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() && !Self::is_ignored(path) {
            Some(path.strip_prefix(self.path.as_ref()).ok()?.to_path_buf())
        } else {
            None
        }
    }

    pub fn read_file(&self, file_path: &Path) -> anyhow::Result<Bytes> {
        let file_path = self.path.join(file_path);
        let content = std::fs::read(&file_path)?;

        Ok(Bytes::from(content))
    }

    pub fn stat_file(&self, file_path: &Path) -> anyhow::Result<EntryMetadata> {
        let absolute = self.path.join(file_path);
        let metadata = std::fs::metadata(&absolute)?;

        (absolute.as_path(), metadata).try_into()
    }

    /// Write a file, replacing whatever occupied the path
    ///
    /// The path is removed first, then recreated with create+exclusive so a
    /// competing writer fails loudly rather than interleaving.
    pub fn write_file(
        &self,
        file_path: &Path,
        data: &[u8],
        mode: Option<EntryMode>,
        remove_existing: bool,
    ) -> anyhow::Result<()> {
        let path = self.path.join(file_path);

        if remove_existing && path.exists() {
            let metadata = std::fs::metadata(&path)?;
            if metadata.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }

        let mut open_options = std::fs::OpenOptions::new();
        open_options.write(true);
        if remove_existing {
            open_options.create_new(true);
        } else {
            open_options.create(true).truncate(true);
        }

        let mut file = open_options.open(&path)?;
        file.write_all(data)?;
        drop(file);

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(mode.as_u32() & 0o777);
            std::fs::set_permissions(&path, permissions)?;
        }

        Ok(())
    }

    pub fn remove_file(&self, file_path: &Path) -> anyhow::Result<()> {
        let path = self.path.join(file_path);

        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    // The order of applying a migration matters: deletes come first, then
    // directory removals deepest-first, directory creations shallow-first,
    // updates, and finally creates.
    pub fn apply_migration(&self, migration: &Migration) -> anyhow::Result<()> {
        self.apply_migration_action_set(migration, ActionType::Delete)?;

        for dir_path in migration.rmdirs().iter().rev() {
            self.remove_directory(dir_path)?;
        }
        for dir_path in migration.mkdirs() {
            self.make_directory(dir_path)?;
        }

        self.apply_migration_action_set(migration, ActionType::Update)?;
        self.apply_migration_action_set(migration, ActionType::Create)?;

        Ok(())
    }

    fn apply_migration_action_set(
        &self,
        migration: &Migration,
        action: ActionType,
    ) -> anyhow::Result<()> {
        for (file_path, entry) in migration
            .actions()
            .get(&action)
            .ok_or_else(|| anyhow::anyhow!("Invalid action type"))?
        {
            match (action, entry) {
                (ActionType::Delete, None) => self.remove_file(file_path)?,
                (ActionType::Create | ActionType::Update, Some(entry)) => {
                    let data = migration.blob_data(&entry.oid)?;
                    self.write_file(file_path, &data, Some(entry.mode), true)?;
                }
                _ => anyhow::bail!("Invalid action and entry combination"),
            }
        }

        Ok(())
    }

    /// Remove a directory if it is empty; anything else is left alone
    fn remove_directory(&self, dir_path: &Path) -> anyhow::Result<()> {
        let dir_path = self.path.join(dir_path);

        match std::fs::remove_dir(&dir_path) {
            Ok(()) => Ok(()),
            // Best effort: non-empty or already-gone directories stay
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::DirectoryNotEmpty
                ) =>
            {
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn make_directory(&self, dir_path: &Path) -> anyhow::Result<()> {
        let path = self.path.join(dir_path);
        let stat = std::fs::metadata(&path).ok();

        if let Some(stat) = stat {
            if stat.is_file() {
                std::fs::remove_file(&path)?;
            }
            if !stat.is_dir() {
                std::fs::create_dir_all(&path)?;
            }
        } else {
            std::fs::create_dir_all(&path)?;
        }

        Ok(())
    }
}

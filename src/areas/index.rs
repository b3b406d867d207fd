//! The staging index
//!
//! The index tracks which files should be included in the next commit, and
//! records merge conflicts as entries at stages 1-3. It maintains metadata
//! about files including their mode, timestamps, and SHA-1 hashes.
//!
//! ## Data Structures
//!
//! - `entries`: Maps `(path, stage)` keys to their index entries
//! - `children`: Maps directory paths to the entry paths strictly below them
//!
//! ## Invariants
//!
//! - No path appears simultaneously as a file entry and as a parent of
//!   another entry.
//! - A stage-0 entry and positive-stage entries for the same path are
//!   mutually exclusive.
//!
//! ## Locking
//!
//! Updates go through `index.lock` (create+exclusive, commit by rename).
//! Readers never take locks; a torn read is caught by the SHA-1 trailer.

use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::index::checksum::{Checksum, ChecksumError};
use crate::artifacts::index::index_entry::{
    ENTRY_BLOCK, ENTRY_MIN_SIZE, EntryMetadata, IndexEntry, parent_dirs_of,
};
use crate::artifacts::index::index_header::IndexHeader;
use crate::artifacts::index::{HEADER_SIZE, SIGNATURE, VERSION};
use crate::artifacts::lock::lockfile::Lockfile;
use crate::artifacts::objects::object::{Packable, Unpackable};
use crate::artifacts::objects::object_id::ObjectId;
use anyhow::anyhow;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

type EntryKey = (PathBuf, u8);

/// The staging index
///
/// Tracks files staged for the next commit along with their metadata.
/// The index is persisted to disk and uses a SHA-1 trailer for integrity
/// verification.
#[derive(Debug)]
pub struct Index {
    /// Path to the index file (typically `.git/index`)
    path: Box<Path>,
    /// Tracked entries keyed by `(path, stage)`
    entries: BTreeMap<EntryKey, IndexEntry>,
    /// Directory hierarchy for efficient parent-child lookups
    children: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    /// Index file header metadata
    header: IndexHeader,
    /// Write lock held between `load_for_update` and `write_updates`
    lock: Option<Lockfile>,
    /// Flag indicating if the index has been modified since loading
    changed: bool,
}

impl Index {
    pub fn new(path: Box<Path>) -> Self {
        Index {
            path,
            entries: BTreeMap::new(),
            children: BTreeMap::new(),
            header: IndexHeader::empty(),
            lock: None,
            changed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the resolved (stage 0) entry for a path
    pub fn entry_for_path(&self, path: &Path) -> Option<&IndexEntry> {
        self.entry_at(path, 0)
    }

    /// Look up the entry for a path at a specific stage
    pub fn entry_at(&self, path: &Path, stage: u8) -> Option<&IndexEntry> {
        self.entries.get(&(path.to_path_buf(), stage))
    }

    /// Whether any stage of this path is tracked as a file
    pub fn tracked_file(&self, path: &Path) -> bool {
        (0..=3).any(|stage| self.entries.contains_key(&(path.to_path_buf(), stage)))
    }

    /// Whether this path is the parent directory of tracked entries
    pub fn tracked_directory(&self, path: &Path) -> bool {
        self.children.contains_key(path)
    }

    pub fn tracked(&self, path: &Path) -> bool {
        self.tracked_file(path) || self.tracked_directory(path)
    }

    /// Whether the index currently records any unresolved conflict
    pub fn has_conflict(&self) -> bool {
        self.entries.keys().any(|(_, stage)| *stage > 0)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.children.clear();
        self.header = IndexHeader::empty();
        self.changed = true;
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.children.clear();
        self.header = IndexHeader::empty();
        self.changed = false;
    }

    /// Load the index from disk
    ///
    /// Reads the index file, parses the header and entries, and verifies the
    /// trailer. A missing or empty file yields an empty index.
    pub fn load(&mut self) -> anyhow::Result<()> {
        self.reset();

        let file = match std::fs::File::open(self.path()) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(anyhow::Error::new(err).context("Unable to open index file"));
            }
        };

        if file.metadata()?.len() == 0 {
            return Ok(());
        }

        let mut reader = Checksum::new(file);
        let entries_count = self.parse_header(&mut reader)?;
        self.parse_entries(entries_count, &mut reader)?;

        reader.verify().map_err(|err| match err {
            ChecksumError::Corrupt => anyhow!("Corrupt index: checksum mismatch"),
            other => anyhow!(other),
        })
    }

    /// Acquire the index lock, then load the current on-disk state
    pub fn load_for_update(&mut self) -> anyhow::Result<()> {
        if self.lock.is_none() {
            let mut lock = Lockfile::new(self.path.to_path_buf());
            lock.hold_for_update()?;
            self.lock = Some(lock);
        }

        self.load()
    }

    /// Serialize the index through the held lock and commit it
    ///
    /// A no-op (rollback) when nothing changed since loading.
    pub fn write_updates(&mut self) -> anyhow::Result<()> {
        let mut lock = self
            .lock
            .take()
            .ok_or_else(|| anyhow!("write_updates called without holding the index lock"))?;

        if !self.changed {
            lock.rollback()?;
            return Ok(());
        }

        self.header = IndexHeader {
            entries_count: self.entries.len() as u32,
            ..self.header.clone()
        };

        let mut writer = Checksum::new(Vec::new());
        writer.write(&self.header.serialize()?)?;
        for entry in self.entries.values() {
            writer.write(&entry.serialize()?)?;
        }
        let bytes = writer.write_checksum()?;

        lock.write(&bytes)?;
        lock.commit()?;
        self.changed = false;

        Ok(())
    }

    /// Drop the held lock without writing
    pub fn release_lock(&mut self) -> anyhow::Result<()> {
        if let Some(mut lock) = self.lock.take() {
            lock.rollback()?;
        }

        Ok(())
    }

    fn parse_header<R: std::io::Read>(&self, reader: &mut Checksum<R>) -> anyhow::Result<u32> {
        let header_bytes = reader.read(HEADER_SIZE)?;
        let header_reader = std::io::Cursor::new(header_bytes.clone());
        let header = IndexHeader::deserialize(header_reader)?;

        if header.marker != SIGNATURE {
            return Err(anyhow!("Invalid index file signature"));
        }

        if header.version != VERSION {
            return Err(anyhow!(
                "Unsupported index file version: {}",
                header.version
            ));
        }

        Ok(header.entries_count)
    }

    /// Parse all entries, handling variable-length paths with 8-byte alignment
    fn parse_entries<R: std::io::Read>(
        &mut self,
        entries_count: u32,
        reader: &mut Checksum<R>,
    ) -> anyhow::Result<()> {
        for _ in 0..entries_count {
            let entry_bytes = reader.read(ENTRY_MIN_SIZE)?;
            let mut entry_bytes = entry_bytes.to_vec();

            while entry_bytes[entry_bytes.len() - 1] != 0 {
                entry_bytes = [entry_bytes, reader.read(ENTRY_BLOCK)?.to_vec()].concat();
            }

            let entry_bytes = Bytes::from(entry_bytes);
            let entry_reader = std::io::Cursor::new(entry_bytes.clone());
            let entry = IndexEntry::deserialize(entry_reader)?;

            self.store_entry(entry);
        }

        self.header.entries_count = entries_count;

        Ok(())
    }

    /// Stage a resolved entry for a path
    ///
    /// Removes any entry equal to an ancestor directory of the path (a file
    /// takes the place of a directory), every entry below the path (a
    /// directory replaces its children), and any conflict stages for the
    /// path itself.
    pub fn add(&mut self, path: PathBuf, oid: ObjectId, stat: EntryMetadata) {
        let entry = IndexEntry::resolved(path, oid, stat);

        self.discard_conflicts(&entry);
        self.remove_conflict_stages(&entry.name);
        self.store_entry(entry);
        self.changed = true;
    }

    /// Record a conflict for a path as entries at stages 1-3
    ///
    /// `items` holds the base, ours and theirs versions in that order; absent
    /// sides stay unrecorded. The stage-0 entry for the path is dropped.
    pub fn add_conflict_set(&mut self, path: &Path, items: [Option<DatabaseEntry>; 3]) {
        self.remove_entry_key(&(path.to_path_buf(), 0));

        for (offset, item) in items.into_iter().enumerate() {
            let Some(item) = item else { continue };

            let entry = IndexEntry::new(
                path.to_path_buf(),
                item.oid,
                (offset + 1) as u8,
                EntryMetadata {
                    mode: item.mode,
                    ..Default::default()
                },
            );
            self.store_entry(entry);
        }

        self.changed = true;
    }

    /// Remove every stage of a path, and everything below it
    pub fn remove(&mut self, path: &Path) {
        self.remove_all_stages(path);
        self.remove_children(path);
        self.changed = true;
    }

    pub fn update_entry_stat(&mut self, path: &Path, stat: EntryMetadata) {
        if let Some(entry) = self.entries.get_mut(&(path.to_path_buf(), 0)) {
            entry.update_stat(stat);
            self.changed = true;
        }
    }

    /// All entries in `(path, stage)` order
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Conflict stage entries for a path, indexed base/ours/theirs
    pub fn conflict_entries(&self, path: &Path) -> [Option<&IndexEntry>; 3] {
        [1, 2, 3].map(|stage| self.entry_at(path, stage))
    }

    /// Paths of all entries at or below the given path
    pub fn entries_under_path(&self, path: &Path) -> Vec<PathBuf> {
        self.entries
            .keys()
            .filter(|(entry_path, _)| {
                if path == Path::new(".") || path.as_os_str().is_empty() {
                    return true;
                }
                entry_path.starts_with(path)
            })
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn discard_conflicts(&mut self, entry: &IndexEntry) {
        let parents: Vec<PathBuf> = entry
            .parent_dirs()
            .into_iter()
            .map(|p| p.to_path_buf())
            .collect();

        for parent in parents {
            self.remove_all_stages(&parent);
        }
        self.remove_children(&entry.name.clone());
    }

    fn remove_conflict_stages(&mut self, path: &Path) {
        for stage in 1..=3 {
            self.remove_entry_key(&(path.to_path_buf(), stage));
        }
    }

    fn remove_all_stages(&mut self, path: &Path) {
        for stage in 0..=3 {
            self.remove_entry_key(&(path.to_path_buf(), stage));
        }
    }

    fn store_entry(&mut self, entry: IndexEntry) {
        let parents: Vec<PathBuf> = entry
            .parent_dirs()
            .into_iter()
            .map(|p| p.to_path_buf())
            .collect();

        for parent in parents {
            self.children
                .entry(parent)
                .or_default()
                .insert(entry.name.clone());
        }

        self.entries.insert(entry.key(), entry);
    }

    fn remove_children(&mut self, path: &Path) {
        if let Some(children) = self.children.remove(path) {
            for child in children {
                self.remove_all_stages(&child);
            }
        }
    }

    fn remove_entry_key(&mut self, key: &EntryKey) {
        let Some(entry) = self.entries.remove(key) else {
            return;
        };

        // Drop the entry from every ancestor's child set, unless another
        // stage of the same path is still present
        if (0..=3).any(|stage| self.entries.contains_key(&(entry.name.clone(), stage))) {
            return;
        }

        for parent in parent_dirs_of(&entry.name) {
            let parent = parent.to_path_buf();
            if let Some(children) = self.children.get_mut(&parent) {
                children.remove(&entry.name);
                if children.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::index::entry_mode::{EntryMode, FileMode};
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    fn oid(fill: u8) -> ObjectId {
        ObjectId::try_parse(format!("{:02x}", fill).repeat(20)).unwrap()
    }

    fn stat() -> EntryMetadata {
        EntryMetadata {
            mode: EntryMode::File(FileMode::Regular),
            size: 6,
            ..Default::default()
        }
    }

    #[fixture]
    fn index() -> Index {
        Index::new(PathBuf::from("/tmp/nonexistent-index").into_boxed_path())
    }

    fn paths(index: &Index) -> Vec<String> {
        index
            .entries()
            .map(|e| e.name.to_string_lossy().to_string())
            .collect()
    }

    #[rstest]
    fn test_add_single_file(mut index: Index) {
        index.add(PathBuf::from("alice.txt"), oid(1), stat());

        assert_eq!(paths(&index), vec!["alice.txt"]);
        assert!(index.tracked_file(Path::new("alice.txt")));
    }

    #[rstest]
    fn test_replaces_file_with_directory(mut index: Index) {
        index.add(PathBuf::from("alice.txt"), oid(1), stat());
        index.add(PathBuf::from("bob.txt"), oid(2), stat());
        index.add(PathBuf::from("alice.txt/nested.txt"), oid(3), stat());

        assert_eq!(paths(&index), vec!["alice.txt/nested.txt", "bob.txt"]);
    }

    #[rstest]
    fn test_replaces_directory_with_file(mut index: Index) {
        index.add(PathBuf::from("alice.txt"), oid(1), stat());
        index.add(PathBuf::from("nested/bob.txt"), oid(2), stat());
        index.add(PathBuf::from("nested"), oid(3), stat());

        assert_eq!(paths(&index), vec!["alice.txt", "nested"]);
    }

    #[rstest]
    fn test_recursively_replaces_directory_with_file(mut index: Index) {
        index.add(PathBuf::from("alice.txt"), oid(1), stat());
        index.add(PathBuf::from("nested/bob.txt"), oid(2), stat());
        index.add(PathBuf::from("nested/inner/claire.txt"), oid(3), stat());
        index.add(PathBuf::from("nested"), oid(4), stat());

        assert_eq!(paths(&index), vec!["alice.txt", "nested"]);
        assert!(!index.tracked_directory(Path::new("nested")));
    }

    #[rstest]
    fn test_conflict_set_replaces_resolved_entry(mut index: Index) {
        index.add(PathBuf::from("f.txt"), oid(1), stat());

        let base = DatabaseEntry::new(oid(2), EntryMode::File(FileMode::Regular));
        let ours = DatabaseEntry::new(oid(3), EntryMode::File(FileMode::Regular));
        let theirs = DatabaseEntry::new(oid(4), EntryMode::File(FileMode::Regular));
        index.add_conflict_set(Path::new("f.txt"), [Some(base), Some(ours), Some(theirs)]);

        assert!(index.entry_for_path(Path::new("f.txt")).is_none());
        assert_eq!(index.entry_at(Path::new("f.txt"), 1).unwrap().oid, oid(2));
        assert_eq!(index.entry_at(Path::new("f.txt"), 2).unwrap().oid, oid(3));
        assert_eq!(index.entry_at(Path::new("f.txt"), 3).unwrap().oid, oid(4));
        assert!(index.has_conflict());
    }

    #[rstest]
    fn test_add_resolves_conflict(mut index: Index) {
        let ours = DatabaseEntry::new(oid(3), EntryMode::File(FileMode::Regular));
        index.add_conflict_set(Path::new("f.txt"), [None, Some(ours), None]);
        assert!(index.has_conflict());

        index.add(PathBuf::from("f.txt"), oid(5), stat());

        assert!(!index.has_conflict());
        assert_eq!(index.entry_for_path(Path::new("f.txt")).unwrap().oid, oid(5));
    }

    #[rstest]
    fn test_remove_drops_all_stages_and_children(mut index: Index) {
        index.add(PathBuf::from("dir/a.txt"), oid(1), stat());
        index.add(PathBuf::from("dir/b.txt"), oid(2), stat());

        index.remove(Path::new("dir"));

        assert!(paths(&index).is_empty());
        assert!(!index.tracked(Path::new("dir")));
    }
}

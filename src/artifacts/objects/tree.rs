//! Tree object
//!
//! Trees represent directory snapshots. They contain entries for files
//! (blobs) and subdirectories (other trees), along with their names and
//! modes.
//!
//! ## Format
//!
//! On disk: `tree <size>\0<entries>`
//! Each entry: `<mode> <name>\0<20-byte-sha1>`
//!
//! ## Ordering
//!
//! Entries are serialized in canonical order: names compare as if directory
//! names carried a trailing `/`, so `foo.c` sorts before the subtree `foo`.
//! Serialization enumerates entries in this order regardless of how the tree
//! was built.

use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::index::index_entry::IndexEntry;
use crate::artifacts::objects::object::Unpackable;
use crate::artifacts::objects::object::{Object, Packable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Context;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::Path;

/// Internal tree entry representation
#[derive(Debug, Clone)]
enum TreeEntry {
    /// File entry (blob)
    File(IndexEntry),
    /// Directory entry (nested tree)
    Directory(Tree),
}

impl TreeEntry {
    fn object_type(&self) -> ObjectType {
        match self {
            TreeEntry::File(_) => ObjectType::Blob,
            TreeEntry::Directory(_) => ObjectType::Tree,
        }
    }

    fn mode(&self) -> EntryMode {
        match self {
            TreeEntry::File(entry) => entry.metadata.mode,
            TreeEntry::Directory(_) => EntryMode::Directory,
        }
    }

    fn oid(&self) -> anyhow::Result<ObjectId> {
        match self {
            TreeEntry::File(entry) => Ok(entry.oid.clone()),
            TreeEntry::Directory(tree) => tree.object_id(),
        }
    }
}

/// Tree object representing a directory snapshot
///
/// Trees maintain two sets of entries:
/// - `readable_entries`: For trees loaded from the database
/// - `writeable_entries`: For trees being built from the index
///
/// Directory keys carry a trailing `/` in `writeable_entries`, which keeps
/// the BTreeMap in canonical order while building.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    /// Entries loaded from database (read mode)
    readable_entries: BTreeMap<String, DatabaseEntry>,
    /// Entries being built (write mode)
    writeable_entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
    /// Build a tree from index entries
    ///
    /// Creates a hierarchical tree structure from a flat list of index
    /// entries. Files are organized into directories matching their path
    /// structure. Only resolved (stage 0) entries belong in a tree; the
    /// caller filters.
    pub fn build<'e>(entries: impl Iterator<Item = &'e IndexEntry>) -> anyhow::Result<Self> {
        let mut root = Self::default();

        for entry in entries {
            let parents = entry.parent_dirs();
            root.add_entry(parents, entry)?;
        }

        Ok(root)
    }

    /// Traverse the tree depth-first, calling a function on each node
    ///
    /// Visits children before parents (post-order traversal), which is
    /// necessary for storing trees since child OIDs must be known before
    /// storing the parent.
    pub fn traverse<F>(&self, func: &F) -> anyhow::Result<()>
    where
        F: Fn(&Tree) -> anyhow::Result<()>,
    {
        for entry in &self.writeable_entries {
            if let TreeEntry::Directory(tree) = entry.1 {
                tree.traverse(func)?;
            }
        }
        func(self)?;

        Ok(())
    }

    fn add_entry(&mut self, parents: Vec<&Path>, entry: &IndexEntry) -> anyhow::Result<()> {
        if parents.is_empty() {
            self.writeable_entries.insert(
                entry.basename()?.to_string(),
                TreeEntry::File(entry.clone()),
            );
        } else {
            let parent = parents[0]
                .file_name()
                .and_then(|s| s.to_str())
                .context("Invalid parent")?;
            let parent = format!("{}/", parent);
            let tree = match self.writeable_entries.get_mut(&parent) {
                Some(TreeEntry::Directory(tree)) => tree,
                _ => {
                    self.writeable_entries
                        .insert(parent.clone(), TreeEntry::Directory(Self::default()));

                    match self.writeable_entries.get_mut(&parent) {
                        Some(TreeEntry::Directory(tree)) => tree,
                        _ => unreachable!(),
                    }
                }
            };
            tree.add_entry(parents[1..].to_vec(), entry)?;
        }

        Ok(())
    }

    /// Entries loaded from the database, keyed by plain name
    pub fn entries(&self) -> impl Iterator<Item = (&String, &DatabaseEntry)> {
        self.readable_entries.iter()
    }

    pub fn into_entries(self) -> impl Iterator<Item = (String, DatabaseEntry)> {
        self.readable_entries.into_iter()
    }

    pub fn get(&self, name: &str) -> Option<&DatabaseEntry> {
        self.readable_entries.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.readable_entries.is_empty() && self.writeable_entries.is_empty()
    }

    /// Collect `(sort_key, mode, name, oid)` rows in canonical order
    fn canonical_rows(&self) -> anyhow::Result<Vec<(String, EntryMode, String, ObjectId)>> {
        let mut rows = Vec::new();

        for (name, tree_entry) in &self.writeable_entries {
            let plain = name.trim_end_matches('/').to_string();
            rows.push((name.clone(), tree_entry.mode(), plain, tree_entry.oid()?));
        }
        for (name, entry) in &self.readable_entries {
            let key = if entry.is_tree() {
                format!("{}/", name)
            } else {
                name.clone()
            };
            rows.push((key, entry.mode, name.clone(), entry.oid.clone()));
        }

        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }
}

impl Packable for Tree {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let mut content_bytes = Vec::new();

        for (_, mode, name, oid) in self.canonical_rows()? {
            let header = format!("{:o} {}", mode.as_u32(), name);
            content_bytes.write_all(header.as_bytes())?;
            content_bytes.push(0);
            oid.write_h40_to(&mut content_bytes)?;
        }

        let mut tree_bytes = Vec::new();
        let header = format!("{} {}\0", self.object_type().as_str(), content_bytes.len());
        tree_bytes.write_all(header.as_bytes())?;
        tree_bytes.write_all(&content_bytes)?;

        Ok(Bytes::from(tree_bytes))
    }
}

impl Unpackable for Tree {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        let mut entries = BTreeMap::new();
        let mut reader = reader;

        // Reuse scratch buffers to reduce allocs
        let mut mode_bytes = Vec::new();
        let mut name_bytes = Vec::new();

        loop {
            mode_bytes.clear();
            // Read "mode " (space-delimited)
            let n = reader.read_until(b' ', &mut mode_bytes)?;
            if n == 0 {
                break; // clean EOF: no more entries
            }
            if *mode_bytes.last().unwrap() != b' ' {
                return Err(anyhow::anyhow!("unexpected EOF in mode"));
            }
            mode_bytes.pop(); // drop the space

            let mode_str = std::str::from_utf8(&mode_bytes)?;
            let mode = EntryMode::from_octal_str(mode_str)?;

            // Read "name\0"
            name_bytes.clear();
            let n = reader.read_until(b'\0', &mut name_bytes)?;
            if n == 0 || *name_bytes.last().unwrap() != b'\0' {
                return Err(anyhow::anyhow!("unexpected EOF in name"));
            }
            name_bytes.pop(); // drop NUL
            let name = std::str::from_utf8(&name_bytes)?.to_owned();

            let oid =
                ObjectId::read_h40_from(&mut reader).context("unexpected EOF in object id")?;

            entries.insert(name, DatabaseEntry::new(oid, mode));
        }

        Ok(Tree {
            readable_entries: entries,
            writeable_entries: Default::default(),
        })
    }
}

impl Object for Tree {
    fn object_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn display(&self) -> String {
        self.canonical_rows()
            .unwrap_or_default()
            .into_iter()
            .map(|(_, mode, name, oid)| {
                let object_type = if mode.is_tree() { "tree" } else { "blob" };
                format!("{} {} {}\t{}", mode.as_str(), object_type, oid.as_ref(), name)
            })
            .collect::<Vec<String>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::index::entry_mode::FileMode;
    use crate::artifacts::index::index_entry::{EntryMetadata, IndexEntry};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn oid(fill: u8) -> ObjectId {
        ObjectId::try_parse(format!("{:02x}", fill).repeat(20)).unwrap()
    }

    fn file_entry(path: &str, fill: u8) -> IndexEntry {
        IndexEntry::new(
            PathBuf::from(path),
            oid(fill),
            0,
            EntryMetadata {
                mode: EntryMode::File(FileMode::Regular),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_serialize_orders_directories_with_trailing_slash() {
        // Canonical order: "foo.c" sorts before the subtree "foo"
        let entries = [file_entry("foo/bar.txt", 1), file_entry("foo.c", 2)];
        let tree = Tree::build(entries.iter()).unwrap();

        let bytes = tree.serialize().unwrap();
        let body = &bytes[bytes.iter().position(|&b| b == 0).unwrap() + 1..];

        let foo_c = body.windows(5).position(|w| w == b"foo.c").unwrap();
        let foo = body.windows(4).position(|w| w == b"foo\0").unwrap();
        assert!(foo_c < foo, "foo.c must precede the foo subtree");
    }

    #[test]
    fn test_serialize_is_stable_under_reparse() {
        let entries = [
            file_entry("alpha.txt", 1),
            file_entry("beta/gamma.txt", 2),
            file_entry("beta.txt", 3),
        ];
        let tree = Tree::build(entries.iter()).unwrap();

        let first = tree.serialize().unwrap();
        let mut reader = Cursor::new(first.clone());
        ObjectType::parse_header(&mut reader).unwrap();
        let reparsed = Tree::deserialize(reader).unwrap();

        assert_eq!(reparsed.serialize().unwrap(), first);
    }

    #[test]
    fn test_build_respects_insertion_independence() {
        let forward = [file_entry("a.txt", 1), file_entry("b.txt", 2)];
        let backward = [file_entry("b.txt", 2), file_entry("a.txt", 1)];

        let one = Tree::build(forward.iter()).unwrap();
        let two = Tree::build(backward.iter()).unwrap();

        assert_eq!(one.serialize().unwrap(), two.serialize().unwrap());
        assert_eq!(one.object_id().unwrap(), two.object_id().unwrap());
    }
}

//! Index entry representation
//!
//! Each entry in the index represents a tracked file at a given stage:
//! - File path and conflict stage (0 = resolved, 1/2/3 = base/ours/theirs)
//! - Content hash (object ID)
//! - File metadata (mode, size, timestamps)
//!
//! ## Entry Format
//!
//! Entries are stored in a binary format with 8-byte alignment. The 16-bit
//! flags word packs the stage into bits 12-13 and `min(path_len, 0xFFF)`
//! into bits 0-11. Metadata timestamps enable fast change detection without
//! reading file content.

use crate::artifacts::index::entry_mode::{EntryMode, FileMode};
use crate::artifacts::objects::object::{Packable, Unpackable};
use crate::artifacts::objects::object_id::ObjectId;
use byteorder::{ByteOrder, WriteBytesExt};
use bytes::Bytes;
use derive_new::new;
use is_executable::IsExecutable;
use std::cmp::min;
use std::fs::Metadata;
use std::io::{BufRead, Write};
use std::os::unix::prelude::MetadataExt;
use std::path::{Path, PathBuf};

/// Maximum path length representable in the flags word
const MAX_PATH_SIZE: usize = 0xFFF;

/// Block size for entry alignment (8 bytes)
pub const ENTRY_BLOCK: usize = 8;

/// Minimum size of an index entry in bytes
pub const ENTRY_MIN_SIZE: usize = 64;

/// The stage a conflicted entry records the common ancestor at
pub const STAGE_BASE: u8 = 1;
/// The stage recording "our" side of a conflict
pub const STAGE_OURS: u8 = 2;
/// The stage recording "their" side of a conflict
pub const STAGE_THEIRS: u8 = 3;

/// Index entry representing a tracked file at a stage
#[derive(Debug, Clone, Default, new)]
pub struct IndexEntry {
    /// File path relative to repository root
    pub name: PathBuf,
    /// SHA-1 hash of file content
    pub oid: ObjectId,
    /// Conflict stage (0 = resolved, 1-3 = base/ours/theirs)
    pub stage: u8,
    /// File metadata (mode, size, timestamps)
    pub metadata: EntryMetadata,
}

impl IndexEntry {
    /// Build a resolved (stage 0) entry
    pub fn resolved(name: PathBuf, oid: ObjectId, metadata: EntryMetadata) -> Self {
        IndexEntry::new(name, oid, 0, metadata)
    }

    /// The unique key for this entry
    pub fn key(&self) -> (PathBuf, u8) {
        (self.name.clone(), self.stage)
    }

    pub fn basename(&self) -> anyhow::Result<&str> {
        self.name
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid file name"))
    }

    /// All ancestor directories of this entry, outermost first
    pub fn parent_dirs(&self) -> Vec<&Path> {
        parent_dirs_of(&self.name)
    }

    /// Whether size and mode still agree with a fresh stat
    pub fn stat_match(&self, other: &EntryMetadata) -> bool {
        (self.metadata.size == 0 || self.metadata.size == other.size)
            && self.metadata.mode == other.mode
    }

    /// Whether all four recorded timestamps agree with a fresh stat
    pub fn times_match(&self, other: &EntryMetadata) -> bool {
        self.metadata.ctime == other.ctime
            && self.metadata.ctime_nsec == other.ctime_nsec
            && self.metadata.mtime == other.mtime
            && self.metadata.mtime_nsec == other.mtime_nsec
    }

    /// Refresh the cached stat data after content proved unchanged
    pub fn update_stat(&mut self, stat: EntryMetadata) {
        self.metadata = stat;
    }

    fn flags(&self) -> u16 {
        let path_size = self
            .name
            .to_str()
            .map(|s| s.len())
            .unwrap_or(MAX_PATH_SIZE);

        ((self.stage as u16) << 12) | (min(path_size, MAX_PATH_SIZE) as u16)
    }
}

/// All ancestor directories of a path, outermost first
pub fn parent_dirs_of(path: &Path) -> Vec<&Path> {
    let mut dirs = Vec::new();
    let mut parent = path.parent();

    while let Some(new_parent) = parent {
        dirs.push(new_parent);
        parent = new_parent.parent();
    }
    dirs.reverse();
    if dirs.is_empty() { dirs } else { dirs[1..].to_vec() }
}

impl PartialEq for IndexEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.stage == other.stage
    }
}

impl Eq for IndexEntry {}

impl PartialOrd for IndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// File metadata stored in index entries
///
/// Contains both file status information (mode, size, inode) and timestamps.
/// This metadata enables quick change detection without reading content by
/// comparing stat information. It is never part of the object itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Change time (seconds since Unix epoch)
    pub ctime: i64,
    /// Change time nanoseconds
    pub ctime_nsec: i64,
    /// Modification time (seconds since Unix epoch)
    pub mtime: i64,
    /// Modification time nanoseconds
    pub mtime_nsec: i64,
    /// Device ID
    pub dev: u64,
    /// Inode number
    pub ino: u64,
    /// File mode (permissions and type)
    pub mode: EntryMode,
    /// User ID of owner
    pub uid: u32,
    /// Group ID of owner
    pub gid: u32,
    /// File size in bytes
    pub size: u64,
}

impl Packable for IndexEntry {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let entry_name = self
            .name
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid entry name"))?;
        let entry_mode = self.metadata.mode.as_u32();

        let mut entry_bytes = Vec::new();
        entry_bytes.write_u32::<byteorder::NetworkEndian>(self.metadata.ctime as u32)?;
        entry_bytes.write_u32::<byteorder::NetworkEndian>(self.metadata.ctime_nsec as u32)?;
        entry_bytes.write_u32::<byteorder::NetworkEndian>(self.metadata.mtime as u32)?;
        entry_bytes.write_u32::<byteorder::NetworkEndian>(self.metadata.mtime_nsec as u32)?;
        entry_bytes.write_u32::<byteorder::NetworkEndian>(self.metadata.dev as u32)?;
        entry_bytes.write_u32::<byteorder::NetworkEndian>(self.metadata.ino as u32)?;
        entry_bytes.write_u32::<byteorder::NetworkEndian>(entry_mode)?;
        entry_bytes.write_u32::<byteorder::NetworkEndian>(self.metadata.uid)?;
        entry_bytes.write_u32::<byteorder::NetworkEndian>(self.metadata.gid)?;
        entry_bytes.write_u32::<byteorder::NetworkEndian>(self.metadata.size as u32)?;
        self.oid.write_h40_to(&mut entry_bytes)?;
        entry_bytes.write_u16::<byteorder::NetworkEndian>(self.flags())?;
        entry_bytes.write_all(entry_name.as_bytes())?;

        // NUL-terminate and pad to the 8-byte block size
        entry_bytes.push(0);
        while entry_bytes.len() % ENTRY_BLOCK != 0 {
            entry_bytes.push(0);
        }

        Ok(Bytes::from(entry_bytes))
    }
}

impl Unpackable for IndexEntry {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        let bytes = reader
            .bytes()
            .collect::<Result<Vec<u8>, std::io::Error>>()?;

        if bytes.len() < ENTRY_MIN_SIZE {
            return Err(anyhow::anyhow!("Invalid index entry size"));
        }

        let ctime = byteorder::NetworkEndian::read_u32(&bytes[0..4]) as i64;
        let ctime_nsec = byteorder::NetworkEndian::read_u32(&bytes[4..8]) as i64;
        let mtime = byteorder::NetworkEndian::read_u32(&bytes[8..12]) as i64;
        let mtime_nsec = byteorder::NetworkEndian::read_u32(&bytes[12..16]) as i64;
        let dev = byteorder::NetworkEndian::read_u32(&bytes[16..20]) as u64;
        let ino = byteorder::NetworkEndian::read_u32(&bytes[20..24]) as u64;
        let mode: EntryMode = byteorder::NetworkEndian::read_u32(&bytes[24..28]).try_into()?;
        let uid = byteorder::NetworkEndian::read_u32(&bytes[28..32]);
        let gid = byteorder::NetworkEndian::read_u32(&bytes[32..36]);
        let size = byteorder::NetworkEndian::read_u32(&bytes[36..40]) as u64;
        let mut oid_bytes = std::io::Cursor::new(&bytes[40..60]);
        let oid = ObjectId::read_h40_from(&mut oid_bytes)?;
        let flags = byteorder::NetworkEndian::read_u16(&bytes[60..62]);
        let stage = ((flags >> 12) & 0x3) as u8;

        // Extract the entry name, which is null-terminated
        let name_end = bytes[62..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| anyhow::anyhow!("Missing null terminator in entry name"))?;
        let name_bytes = &bytes[62..62 + name_end];
        let name = PathBuf::from(
            std::str::from_utf8(name_bytes)
                .map_err(|_| anyhow::anyhow!("Invalid UTF-8 in entry name"))?,
        );

        Ok(IndexEntry {
            name,
            oid,
            stage,
            metadata: EntryMetadata {
                ctime,
                ctime_nsec,
                mtime,
                mtime_nsec,
                dev,
                ino,
                mode,
                uid,
                gid,
                size,
            },
        })
    }
}

impl TryFrom<(&Path, Metadata)> for EntryMetadata {
    type Error = anyhow::Error;

    fn try_from((file_path, metadata): (&Path, Metadata)) -> Result<Self, Self::Error> {
        let mode = if metadata.is_dir() {
            EntryMode::Directory
        } else {
            match file_path.is_executable() {
                true => EntryMode::File(FileMode::Executable),
                false => EntryMode::File(FileMode::Regular),
            }
        };

        Ok(Self {
            ctime: metadata.ctime(),
            ctime_nsec: metadata.ctime_nsec(),
            mtime: metadata.mtime(),
            mtime_nsec: metadata.mtime_nsec(),
            dev: metadata.dev(),
            ino: metadata.ino(),
            mode,
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: metadata.size(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};
    use sha1::Digest;
    use std::io::Cursor;

    #[fixture]
    fn oid() -> ObjectId {
        let mut hasher = sha1::Sha1::new();
        hasher.update("test data");
        ObjectId::try_parse(format!("{:x}", hasher.finalize())).unwrap()
    }

    #[fixture]
    fn entry_metadata() -> EntryMetadata {
        EntryMetadata {
            mode: EntryMode::File(FileMode::Regular),
            size: 42,
            mtime: 1000,
            ..Default::default()
        }
    }

    #[rstest]
    fn test_entry_parent_dirs(oid: ObjectId, entry_metadata: EntryMetadata) {
        let entry = IndexEntry::resolved(PathBuf::from("a/b/c"), oid, entry_metadata);

        let dirs = entry.parent_dirs();
        assert_eq!(dirs, vec![Path::new("a"), Path::new("a/b")]);
    }

    #[rstest]
    fn test_entry_parent_dirs_root(oid: ObjectId, entry_metadata: EntryMetadata) {
        let entry = IndexEntry::resolved(PathBuf::from("a"), oid, entry_metadata);

        assert_eq!(entry.parent_dirs(), Vec::<&Path>::new());
    }

    #[rstest]
    fn test_entry_basename(oid: ObjectId, entry_metadata: EntryMetadata) {
        let entry = IndexEntry::resolved(PathBuf::from("a/b/c"), oid, entry_metadata);

        assert_eq!(entry.basename().unwrap(), "c");
    }

    #[rstest]
    #[case(0)]
    #[case(STAGE_BASE)]
    #[case(STAGE_OURS)]
    #[case(STAGE_THEIRS)]
    fn test_stage_survives_serialization(
        #[case] stage: u8,
        oid: ObjectId,
        entry_metadata: EntryMetadata,
    ) {
        let entry = IndexEntry::new(PathBuf::from("dir/file.txt"), oid, stage, entry_metadata);

        let bytes = entry.serialize().unwrap();
        assert_eq!(bytes.len() % ENTRY_BLOCK, 0);

        let parsed = IndexEntry::deserialize(Cursor::new(bytes)).unwrap();
        assert_eq!(parsed.stage, stage);
        assert_eq!(parsed.name, entry.name);
        assert_eq!(parsed.oid, entry.oid);
        assert_eq!(parsed.metadata, entry.metadata);
    }

    #[rstest]
    fn test_stat_match_ignores_size_when_zero(oid: ObjectId) {
        let entry = IndexEntry::resolved(
            PathBuf::from("f"),
            oid,
            EntryMetadata {
                size: 0,
                ..Default::default()
            },
        );

        let stat = EntryMetadata {
            size: 999,
            ..Default::default()
        };
        assert!(entry.stat_match(&stat));
    }

    #[rstest]
    fn test_times_match_detects_touched_file(oid: ObjectId, entry_metadata: EntryMetadata) {
        let entry = IndexEntry::resolved(PathBuf::from("f"), oid, entry_metadata.clone());

        let touched = EntryMetadata {
            mtime: entry_metadata.mtime + 1,
            ..entry_metadata
        };
        assert!(!entry.times_match(&touched));
    }
}

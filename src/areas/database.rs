//! The object database
//!
//! A single logical store fronted by an ordered list of backends: loose
//! objects first, then every installed pack. Reads take the first backend
//! that knows the OID; writes always land loosely (packs are produced en
//! masse by the pack machinery, never one object at a time).
//!
//! ## Loose storage
//!
//! One file per object at `objects/<oid[0..2]>/<oid[2..]>`, containing the
//! zlib-deflated canonical bytes. Writes stage into a uniquely named temp
//! file in the same directory and publish by rename, which makes two
//! concurrent writers of the same OID idempotent.
//!
//! ## Packed storage
//!
//! `pack/pack-<hash>.pack` files paired with their `.idx`. Lookups go
//! through the index fan-out; delta records are reconstructed on read.
//! After a new pack lands the backend list must be rescanned via `reload`.

use crate::artifacts::diff::tree_diff::{ChangeSet, TreeDiff};
use crate::artifacts::log::path_filter::PathFilter;
use crate::artifacts::merge::common_ancestors::CommitSource;
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::commit::{Commit, SlimCommit};
use crate::artifacts::objects::object::{Object, ObjectBox, Packable, Unpackable, hash_raw};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::tree::Tree;
use crate::artifacts::pack::expander::Expander;
use crate::artifacts::pack::idx::PackIndex;
use crate::artifacts::pack::indexer::Indexer;
use crate::artifacts::pack::numbers::{object_header, varint_le};
use crate::artifacts::pack::reader::{Reader, Record};
use crate::artifacts::pack::stream::{Stream, StreamReader};
use crate::artifacts::pack::unpacker::Unpacker;
use crate::artifacts::pack::{DEFAULT_UNPACK_LIMIT, PackError};
use anyhow::Context;
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Lookup failure across every backend
#[derive(Debug, Error)]
#[error("object {oid} not found in the database")]
pub struct NotFound {
    pub oid: String,
}

/// An object in its raw stored form: type, declared size, payload bytes
#[derive(Debug, Clone)]
pub struct RawObject {
    pub object_type: ObjectType,
    pub size: u64,
    pub data: Bytes,
}

/// One installed pack: its in-memory index plus the path of the data file
#[derive(Debug)]
struct PackSource {
    index: PackIndex,
    pack_path: PathBuf,
}

/// The object database
#[derive(Debug)]
pub struct Database {
    /// Path to the objects directory (typically `.git/objects`)
    path: Box<Path>,
    /// Installed packs, rescanned on `reload`
    packs: RefCell<Vec<PackSource>>,
}

impl Database {
    pub fn new(path: Box<Path>) -> Self {
        let database = Database {
            path,
            packs: RefCell::new(Vec::new()),
        };
        let _ = database.reload();
        database
    }

    pub fn objects_path(&self) -> &Path {
        &self.path
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.path.join("pack")
    }

    /// Rescan the pack directory for `.idx`/`.pack` pairs
    pub fn reload(&self) -> anyhow::Result<()> {
        let mut packs = Vec::new();
        let pack_dir = self.pack_dir();

        if pack_dir.is_dir() {
            for entry in std::fs::read_dir(&pack_dir)? {
                let entry = entry?;
                let idx_path = entry.path();
                if idx_path.extension().is_none_or(|ext| ext != "idx") {
                    continue;
                }

                let pack_path = idx_path.with_extension("pack");
                if !pack_path.exists() {
                    continue;
                }

                packs.push(PackSource {
                    index: PackIndex::load(&idx_path)?,
                    pack_path,
                });
            }
        }

        *self.packs.borrow_mut() = packs;
        Ok(())
    }

    /// Store an object, computing its ID; a no-op if already present
    pub fn store(&self, object: &impl Object) -> anyhow::Result<ObjectId> {
        let content = object.serialize()?;
        let oid = object.object_id()?;

        self.write_loose(&oid, &content)?;
        Ok(oid)
    }

    /// Store an already-serialized payload under its type
    pub fn store_raw(&self, object_type: ObjectType, data: &[u8]) -> anyhow::Result<ObjectId> {
        let oid = hash_raw(object_type, data)?;

        let mut content = Vec::with_capacity(data.len() + 32);
        content.extend_from_slice(
            format!("{} {}\0", object_type.as_str(), data.len()).as_bytes(),
        );
        content.extend_from_slice(data);

        self.write_loose(&oid, &content)?;
        Ok(oid)
    }

    /// Whether any backend holds the object
    pub fn has(&self, oid: &ObjectId) -> bool {
        if self.path.join(oid.to_path()).exists() {
            return true;
        }

        self.packs
            .borrow()
            .iter()
            .any(|pack| pack.index.has(oid))
    }

    /// Load the raw serialized form of an object
    ///
    /// The loose backend wins; packs are consulted in scan order. Deltas are
    /// reconstructed transparently.
    pub fn load_raw(&self, oid: &ObjectId) -> anyhow::Result<RawObject> {
        let loose_path = self.path.join(oid.to_path());
        if loose_path.exists() {
            return self.read_loose(&loose_path);
        }

        let located = self.locate_packed(oid);
        if let Some((pack_index, offset)) = located {
            let (object_type, data) = self.expand_packed(pack_index, offset)?;
            return Ok(RawObject {
                object_type,
                size: data.len() as u64,
                data: Bytes::from(data),
            });
        }

        Err(NotFound {
            oid: oid.to_string(),
        }
        .into())
    }

    /// Type and size of an object without loading its full content
    pub fn load_info(&self, oid: &ObjectId) -> anyhow::Result<(ObjectType, u64)> {
        let loose_path = self.path.join(oid.to_path());
        if loose_path.exists() {
            return self.read_loose_info(&loose_path);
        }

        if let Some((pack_index, offset)) = self.locate_packed(oid) {
            return self.packed_info(pack_index, offset);
        }

        Err(NotFound {
            oid: oid.to_string(),
        }
        .into())
    }

    /// Parse an object from the database into the appropriate type
    pub fn parse_object(&self, oid: &ObjectId) -> anyhow::Result<ObjectBox> {
        let raw = self.load_raw(oid)?;
        let reader = Cursor::new(raw.data);

        match raw.object_type {
            ObjectType::Blob => Ok(ObjectBox::Blob(Box::new(Blob::deserialize(reader)?))),
            ObjectType::Tree => Ok(ObjectBox::Tree(Box::new(Tree::deserialize(reader)?))),
            ObjectType::Commit => Ok(ObjectBox::Commit(Box::new(Commit::deserialize(reader)?))),
        }
    }

    pub fn parse_object_as_blob(&self, oid: &ObjectId) -> anyhow::Result<Option<Blob>> {
        match self.parse_object(oid)? {
            ObjectBox::Blob(blob) => Ok(Some(*blob)),
            _ => Ok(None),
        }
    }

    pub fn parse_object_as_tree(&self, oid: &ObjectId) -> anyhow::Result<Option<Tree>> {
        match self.parse_object(oid)? {
            ObjectBox::Tree(tree) => Ok(Some(*tree)),
            _ => Ok(None),
        }
    }

    pub fn parse_object_as_commit(&self, oid: &ObjectId) -> anyhow::Result<Option<Commit>> {
        match self.parse_object(oid)? {
            ObjectBox::Commit(commit) => Ok(Some(*commit)),
            _ => Ok(None),
        }
    }

    /// All OIDs whose hex form begins with the prefix
    ///
    /// Unions loose directory entries with pack index fan-out probes.
    pub fn prefix_match(&self, prefix: &str) -> anyhow::Result<Vec<ObjectId>> {
        let mut matches = BTreeSet::new();

        if prefix.len() >= 2 {
            let dir_path = self.path.join(&prefix[..2]);
            if dir_path.is_dir() {
                for entry in std::fs::read_dir(&dir_path)? {
                    let file_name = entry?.file_name();
                    let full = format!("{}{}", &prefix[..2], file_name.to_string_lossy());
                    if full.starts_with(prefix)
                        && let Ok(oid) = ObjectId::try_parse(full)
                    {
                        matches.insert(oid);
                    }
                }
            }
        } else {
            for byte in 0..=255u8 {
                let dir_name = format!("{:02x}", byte);
                let dir_path = self.path.join(&dir_name);
                if !dir_path.is_dir() {
                    continue;
                }
                for entry in std::fs::read_dir(&dir_path)? {
                    let file_name = entry?.file_name();
                    let full = format!("{}{}", dir_name, file_name.to_string_lossy());
                    if full.starts_with(prefix)
                        && let Ok(oid) = ObjectId::try_parse(full)
                    {
                        matches.insert(oid);
                    }
                }
            }
        }

        for pack in self.packs.borrow().iter() {
            matches.extend(pack.index.prefix_match(prefix));
        }

        Ok(matches.into_iter().collect())
    }

    /// Diff two trees (or commits) under a path filter
    pub fn tree_diff(
        &self,
        old_oid: Option<&ObjectId>,
        new_oid: Option<&ObjectId>,
        path_filter: &PathFilter,
    ) -> anyhow::Result<TreeDiff<'_>> {
        let mut tree_diff = TreeDiff::new(self);
        tree_diff.compare_oids(old_oid, new_oid, path_filter)?;
        Ok(tree_diff)
    }

    /// Unfiltered tree diff, returning the change set directly
    pub fn tree_diff_all(
        &self,
        old_oid: Option<&ObjectId>,
        new_oid: Option<&ObjectId>,
    ) -> anyhow::Result<ChangeSet> {
        Ok(self
            .tree_diff(old_oid, new_oid, &PathFilter::empty())?
            .into_changes())
    }

    /// Consume an incoming pack stream
    ///
    /// Small packs (below the unpack limit) are exploded into loose
    /// objects; larger ones are written to disk verbatim and indexed.
    pub fn receive_pack(
        &self,
        input: impl Read,
        unpack_limit: Option<u32>,
    ) -> anyhow::Result<()> {
        let mut stream = Stream::new(input);

        let head = stream.peek(12)?;
        if head.len() < 12 {
            return Err(PackError::Corrupt("pack header truncated".to_string()).into());
        }
        let count = u32::from_be_bytes(head[8..12].try_into().unwrap());

        if count < unpack_limit.unwrap_or(DEFAULT_UNPACK_LIMIT) {
            let mut reader = Reader::from_stream(stream);
            reader.read_header()?;
            Unpacker::new(self, reader).process_pack()?;
        } else {
            let mut indexer = Indexer::new(self, stream, self.pack_dir())?;
            indexer.process_pack()?;
        }

        Ok(())
    }

    fn locate_packed(&self, oid: &ObjectId) -> Option<(usize, u64)> {
        let packs = self.packs.borrow();
        packs
            .iter()
            .enumerate()
            .find_map(|(i, pack)| pack.index.offset_for(oid).map(|offset| (i, offset)))
    }

    fn pack_path(&self, pack_index: usize) -> PathBuf {
        self.packs.borrow()[pack_index].pack_path.clone()
    }

    fn read_record_at(&self, pack_index: usize, offset: u64) -> anyhow::Result<Record> {
        let mut file = File::open(self.pack_path(pack_index))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut reader = Reader::from_stream(Stream::with_offset(file, offset));
        Ok(reader.read_record()?.1)
    }

    /// Fully reconstruct the object at a pack offset
    fn expand_packed(
        &self,
        pack_index: usize,
        offset: u64,
    ) -> anyhow::Result<(ObjectType, Vec<u8>)> {
        match self.read_record_at(pack_index, offset)? {
            Record::Simple { kind, data } => Ok((ObjectType::from_pack_code(kind)?, data)),
            Record::OfsDelta { base_offset, delta } => {
                let (object_type, base) = self.expand_packed(pack_index, base_offset)?;
                Ok((object_type, Expander::expand(&base, &delta)?))
            }
            Record::RefDelta { base_oid, delta } => {
                let base = self.load_raw(&base_oid)?;
                Ok((base.object_type, Expander::expand(&base.data, &delta)?))
            }
        }
    }

    /// Type and size at a pack offset without expanding the object
    ///
    /// For deltas the target size comes from the delta preamble and the
    /// type from chasing the base chain's headers.
    fn packed_info(&self, pack_index: usize, offset: u64) -> anyhow::Result<(ObjectType, u64)> {
        let mut file = File::open(self.pack_path(pack_index))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut stream = Stream::with_offset(file, offset);
        let (kind, size) = object_header::read(&mut StreamReader(&mut stream))?;

        if (1..=3).contains(&kind) {
            return Ok((ObjectType::from_pack_code(kind)?, size));
        }

        match self.read_record_at(pack_index, offset)? {
            Record::Simple { kind, data } => {
                Ok((ObjectType::from_pack_code(kind)?, data.len() as u64))
            }
            Record::OfsDelta { base_offset, delta } => {
                let (object_type, _) = self.packed_info(pack_index, base_offset)?;
                Ok((object_type, delta_target_size(&delta)?))
            }
            Record::RefDelta { base_oid, delta } => {
                let (object_type, _) = self.load_info(&base_oid)?;
                Ok((object_type, delta_target_size(&delta)?))
            }
        }
    }

    fn read_loose(&self, path: &Path) -> anyhow::Result<RawObject> {
        let compressed = std::fs::read(path)
            .with_context(|| format!("Unable to read object file {}", path.display()))?;
        let content = Self::decompress(&compressed)?;

        let mut reader = Cursor::new(&content);
        let (object_type, size) = ObjectType::parse_header(&mut reader)?;
        let payload = content[reader.position() as usize..].to_vec();

        if payload.len() as u64 != size {
            return Err(anyhow::anyhow!(
                "Corrupt loose object {}: declared {} bytes, found {}",
                path.display(),
                size,
                payload.len()
            ));
        }

        Ok(RawObject {
            object_type,
            size,
            data: Bytes::from(payload),
        })
    }

    /// Parse the `<type> <size>\0` header of a loose object
    ///
    /// The first 128 compressed bytes are enough to recover the header.
    fn read_loose_info(&self, path: &Path) -> anyhow::Result<(ObjectType, u64)> {
        let mut head = Vec::with_capacity(128);
        File::open(path)?.take(128).read_to_end(&mut head)?;

        let mut inflater = flate2::Decompress::new(true);
        let mut out = Vec::with_capacity(128);
        inflater
            .decompress_vec(&head, &mut out, flate2::FlushDecompress::None)
            .context("Corrupt loose object header")?;

        let mut reader = Cursor::new(&out);
        ObjectType::parse_header(&mut reader)
    }

    fn write_loose(&self, oid: &ObjectId, content: &[u8]) -> anyhow::Result<()> {
        let object_path = self.path.join(oid.to_path());
        if object_path.exists() {
            return Ok(());
        }

        let object_dir = object_path
            .parent()
            .context(format!("Invalid object path {}", object_path.display()))?;
        std::fs::create_dir_all(object_dir).context(format!(
            "Unable to create object directory {}",
            object_dir.display()
        ))?;

        let temp_object_path = object_dir.join(Self::generate_temp_name());
        let compressed = Self::compress(content)?;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_object_path)
            .context(format!(
                "Unable to open object file {}",
                temp_object_path.display()
            ))?;
        file.write_all(&compressed).context(format!(
            "Unable to write object file {}",
            temp_object_path.display()
        ))?;
        file.sync_all()?;
        drop(file);

        // rename makes the write atomic; competing writers of the same OID
        // are idempotent
        std::fs::rename(&temp_object_path, &object_path).context(format!(
            "Unable to rename object file to {}",
            object_path.display()
        ))?;

        Ok(())
    }

    fn compress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(data)
            .context("Unable to compress object content")?;

        encoder
            .finish()
            .context("Unable to finish compressing object content")
    }

    fn decompress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut decoder = flate2::read::ZlibDecoder::new(data);
        let mut decompressed_content = Vec::new();
        decoder
            .read_to_end(&mut decompressed_content)
            .context("Unable to decompress object content")?;

        Ok(decompressed_content)
    }

    fn generate_temp_name() -> String {
        format!("tmp-obj-{:08x}", rand::random::<u32>())
    }
}

impl CommitSource for Database {
    fn slim_commit(&self, oid: &ObjectId) -> anyhow::Result<SlimCommit> {
        let commit = self
            .parse_object_as_commit(oid)?
            .ok_or_else(|| anyhow::anyhow!("object {} is not a commit", oid))?;

        Ok(SlimCommit {
            oid: oid.clone(),
            parents: commit.parents().to_vec(),
            timestamp: commit.timestamp(),
        })
    }
}

/// The declared target size in a delta preamble
fn delta_target_size(delta: &[u8]) -> anyhow::Result<u64> {
    let mut reader = Cursor::new(delta);
    varint_le::read(&mut reader)?;
    Ok(varint_le::read(&mut reader)?)
}

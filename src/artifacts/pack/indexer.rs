//! Keeping large packs packed
//!
//! Above the unpack limit the incoming stream is written verbatim to disk
//! while its index is built. Non-delta records are hashed as they stream
//! past; delta records are deferred, keyed by their base, and resolved in a
//! second pass that re-reads them from the on-disk copy once their base's
//! OID is known. Nothing is installed until the trailer verifies, so an
//! aborted transfer leaves no `.pack`/`.idx` pair behind.

use crate::areas::database::Database;
use crate::artifacts::objects::object::hash_raw;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::pack::expander::Expander;
use crate::artifacts::pack::idx::{self, IdxEntry};
use crate::artifacts::pack::reader::{Reader, Record};
use crate::artifacts::pack::stream::Stream;
use crate::artifacts::pack::PackError;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom};
use std::path::PathBuf;

pub struct Indexer<'a, R: Read> {
    database: &'a Database,
    reader: Reader<R>,
    pack_dir: PathBuf,
    tmp_path: PathBuf,
    /// Objects whose OID is known, in stream order
    entries: Vec<IdxEntry>,
    /// Pack offset -> OID for every resolved record
    offset_map: HashMap<u64, ObjectId>,
    /// OID -> pack offset for every resolved record
    oid_offsets: HashMap<ObjectId, u64>,
    /// Deferred REF_DELTA records keyed by base OID
    pending_ref: HashMap<ObjectId, Vec<(u64, u32)>>,
    /// Deferred OFS_DELTA records keyed by base offset
    pending_ofs: HashMap<u64, Vec<(u64, u32)>>,
}

impl<'a, R: Read> Indexer<'a, R> {
    /// Start indexing an incoming stream into the given pack directory
    ///
    /// The stream is copied to a uniquely named temp file as it is parsed;
    /// no byte of it may have been consumed yet.
    pub fn new(
        database: &'a Database,
        mut stream: Stream<R>,
        pack_dir: PathBuf,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&pack_dir)?;
        let tmp_path = pack_dir.join(format!("tmp-pack-{:08x}", rand::random::<u32>()));
        let tee = BufWriter::new(File::create(&tmp_path)?);

        stream.set_tee(Box::new(tee));
        let reader = Reader::from_stream(stream);

        Ok(Indexer {
            database,
            reader,
            pack_dir,
            tmp_path,
            entries: Vec::new(),
            offset_map: HashMap::new(),
            oid_offsets: HashMap::new(),
            pending_ref: HashMap::new(),
            pending_ofs: HashMap::new(),
        })
    }

    /// Consume the stream and install `pack-<digest>.pack` + `.idx`
    ///
    /// Returns the installed pack name.
    pub fn process_pack(&mut self) -> anyhow::Result<String> {
        let result = self.try_process_pack();

        if result.is_err() {
            let _ = std::fs::remove_file(&self.tmp_path);
        }

        result
    }

    fn try_process_pack(&mut self) -> anyhow::Result<String> {
        self.reader.read_header()?;

        for _ in 0..self.reader.count {
            self.index_record()?;
        }

        let pack_digest = self.reader.verify_trailer()?;
        self.reader.stream.finish_tee()?;

        self.resolve_deltas()?;

        if !self.pending_ref.is_empty() || !self.pending_ofs.is_empty() {
            return Err(PackError::Corrupt(
                "pack contains deltas with no base in the pack".to_string(),
            )
            .into());
        }

        self.install(&pack_digest)
    }

    fn index_record(&mut self) -> anyhow::Result<()> {
        self.reader.stream.begin_capture();
        let (offset, record) = self.reader.read_record()?;
        let crc = crc32fast::hash(&self.reader.stream.end_capture());

        match record {
            Record::Simple { kind, data } => {
                let oid = hash_raw(ObjectType::from_pack_code(kind)?, &data)?;
                self.record_object(oid, offset, crc);
            }
            Record::RefDelta { base_oid, delta: _ } => {
                self.pending_ref
                    .entry(base_oid)
                    .or_default()
                    .push((offset, crc));
            }
            Record::OfsDelta {
                base_offset,
                delta: _,
            } => {
                self.pending_ofs
                    .entry(base_offset)
                    .or_default()
                    .push((offset, crc));
            }
        }

        Ok(())
    }

    fn record_object(&mut self, oid: ObjectId, offset: u64, crc: u32) {
        self.entries.push(IdxEntry {
            oid: oid.clone(),
            offset,
            crc32: crc,
        });
        self.offset_map.insert(offset, oid.clone());
        self.oid_offsets.insert(oid, offset);
    }

    /// Second pass: expand deferred deltas against their now-known bases
    fn resolve_deltas(&mut self) -> anyhow::Result<()> {
        let mut expanded: HashMap<u64, (ObjectType, Vec<u8>)> = HashMap::new();
        let mut queue: VecDeque<ObjectId> =
            self.entries.iter().map(|e| e.oid.clone()).collect();

        while let Some(base_oid) = queue.pop_front() {
            let Some(&base_offset) = self.oid_offsets.get(&base_oid) else {
                continue;
            };

            let mut dependants = self.pending_ref.remove(&base_oid).unwrap_or_default();
            dependants.extend(self.pending_ofs.remove(&base_offset).unwrap_or_default());

            for (offset, crc) in dependants {
                let (object_type, data) = self.expand_at(offset, &mut expanded)?;
                let oid = hash_raw(object_type, &data)?;
                self.record_object(oid.clone(), offset, crc);
                queue.push_back(oid);
            }
        }

        Ok(())
    }

    /// Expand the record at an offset of the on-disk copy, memoized
    fn expand_at(
        &self,
        offset: u64,
        expanded: &mut HashMap<u64, (ObjectType, Vec<u8>)>,
    ) -> anyhow::Result<(ObjectType, Vec<u8>)> {
        if let Some(found) = expanded.get(&offset) {
            return Ok(found.clone());
        }

        let (_, record) = self.read_record_at(offset)?;

        let result = match record {
            Record::Simple { kind, data } => (ObjectType::from_pack_code(kind)?, data),
            Record::RefDelta { base_oid, delta } => {
                let base_offset = self.oid_offsets.get(&base_oid).copied().ok_or_else(|| {
                    PackError::Corrupt(format!("ref-delta base {} not in pack", base_oid))
                })?;
                let (object_type, base) = self.expand_at(base_offset, expanded)?;
                (object_type, Expander::expand(&base, &delta)?)
            }
            Record::OfsDelta { base_offset, delta } => {
                let (object_type, base) = self.expand_at(base_offset, expanded)?;
                (object_type, Expander::expand(&base, &delta)?)
            }
        };

        expanded.insert(offset, result.clone());
        Ok(result)
    }

    fn read_record_at(&self, offset: u64) -> anyhow::Result<(u64, Record)> {
        let mut file = File::open(&self.tmp_path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut reader = Reader::from_stream(Stream::with_offset(file, offset));
        Ok(reader.read_record()?)
    }

    /// Name the pack after its trailer digest and move it into place
    ///
    /// The `.pack` lands first; a pack without its `.idx` is simply
    /// invisible to the backends.
    fn install(&mut self, pack_digest: &[u8; 20]) -> anyhow::Result<String> {
        let name: String = pack_digest.iter().map(|b| format!("{:02x}", b)).collect();

        let pack_path = self.pack_dir.join(format!("pack-{}.pack", name));
        let idx_path = self.pack_dir.join(format!("pack-{}.idx", name));

        std::fs::rename(&self.tmp_path, &pack_path)?;

        let idx_bytes = idx::write_index(&mut self.entries, pack_digest)?;
        std::fs::write(&idx_path, idx_bytes)?;

        self.database.reload()?;

        Ok(name)
    }
}

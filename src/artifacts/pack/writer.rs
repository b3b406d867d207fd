//! The pack encoder
//!
//! Candidates come from a revision walk (`objects = true`). Entries are
//! sorted so similar objects cluster, a window of recent objects slides
//! over the sorted list in reverse, and each entry is tried as a delta
//! against every window member under a depth-weighted size budget. Writing
//! emits each entry's base before the entry itself, choosing REF_DELTA or
//! OFS_DELTA per the negotiated capability.

use crate::areas::database::Database;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::pack::delta;
use crate::artifacts::pack::entry::{DeltaLink, Entry};
use crate::artifacts::pack::numbers::{object_header, varint_be};
use crate::artifacts::pack::window::{Unpacked, Window};
use crate::artifacts::pack::{SIGNATURE, VERSION};
use byteorder::{BigEndian, WriteBytesExt};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

/// Longest allowed delta chain
pub const MAX_DEPTH: u32 = 50;
/// Sliding window size
pub const WINDOW_SIZE: usize = 8;
/// Objects smaller than this are not worth deltifying
pub const DELTA_MIN_SIZE: u64 = 50;
/// Objects larger than this are excluded from delta search
pub const DELTA_MAX_SIZE: u64 = 0x2000_0000;

pub struct Writer<'a, W: Write> {
    output: W,
    database: &'a Database,
    digest: Sha1,
    offset: u64,
    entries: Vec<Entry>,
    index_of: HashMap<ObjectId, usize>,
    /// Whether the receiver negotiated `ofs-delta`
    allow_ofs: bool,
}

impl<'a, W: Write> Writer<'a, W> {
    pub fn new(output: W, database: &'a Database, allow_ofs: bool) -> Self {
        Writer {
            output,
            database,
            digest: Sha1::new(),
            offset: 0,
            entries: Vec::new(),
            index_of: HashMap::new(),
            allow_ofs,
        }
    }

    /// Encode the candidate set as a complete pack stream
    pub fn write_objects(
        &mut self,
        candidates: Vec<(ObjectId, Option<PathBuf>)>,
    ) -> anyhow::Result<()> {
        self.prepare_entries(candidates)?;
        self.compress_entries()?;

        self.write_header()?;
        for index in 0..self.entries.len() {
            self.write_entry(index)?;
        }

        let digest = self.digest.clone().finalize();
        self.output.write_all(&digest)?;
        self.output.flush()?;

        Ok(())
    }

    fn prepare_entries(
        &mut self,
        candidates: Vec<(ObjectId, Option<PathBuf>)>,
    ) -> anyhow::Result<()> {
        for (oid, path) in candidates {
            if self.index_of.contains_key(&oid) {
                continue;
            }

            let (object_type, size) = self.database.load_info(&oid)?;
            let entry = Entry::new(oid.clone(), object_type.pack_code(), size, path);

            self.index_of.insert(oid, self.entries.len());
            self.entries.push(entry);
        }

        Ok(())
    }

    fn compress_entries(&mut self) -> anyhow::Result<()> {
        let mut order: Vec<usize> = (0..self.entries.len())
            .filter(|&i| {
                let size = self.entries[i].size;
                (DELTA_MIN_SIZE..=DELTA_MAX_SIZE).contains(&size)
            })
            .collect();
        order.sort_by_key(|&i| self.entries[i].sort_key());

        let mut window = Window::new(WINDOW_SIZE);

        for &index in order.iter().rev() {
            let raw = self.database.load_raw(&self.entries[index].oid)?;
            let target = Unpacked::new(index, raw.data);

            for source in window.iter() {
                self.try_delta(source, &target);
            }
            window.push(target);
        }

        Ok(())
    }

    fn try_delta(&mut self, source: &Unpacked, target: &Unpacked) {
        let source_entry = &self.entries[source.entry_index];
        let target_entry = &self.entries[target.entry_index];

        if source_entry.kind != target_entry.kind {
            return;
        }
        if source_entry.depth >= MAX_DEPTH {
            return;
        }

        let max_size = self.max_size_heuristic(source.entry_index, target.entry_index);
        if !self.compatible_sizes(source.entry_index, target.entry_index, max_size) {
            return;
        }

        let data = delta::compress(source.index(), &target.data);

        let acceptable = match &self.entries[target.entry_index].delta {
            // An existing delta is only replaced by a strictly smaller one
            Some(existing) => data.len() < existing.data.len(),
            None => data.len() as u64 <= max_size,
        };
        if !acceptable {
            return;
        }

        let depth = self.entries[source.entry_index].depth + 1;
        self.entries[target.entry_index].assign_delta(
            DeltaLink {
                base: source.entry_index,
                data,
            },
            depth,
        );
    }

    /// The delta size budget, scaled down as chains grow deeper
    fn max_size_heuristic(&self, source: usize, target: usize) -> u64 {
        let target_entry = &self.entries[target];

        let (max_size, ref_depth) = match &target_entry.delta {
            Some(existing) => (existing.data.len() as u64, target_entry.depth),
            None => ((target_entry.size / 2).saturating_sub(20), 1),
        };

        let source_depth = self.entries[source].depth;
        max_size * (MAX_DEPTH - source_depth) as u64 / (MAX_DEPTH + 1 - ref_depth) as u64
    }

    fn compatible_sizes(&self, source: usize, target: usize, max_size: u64) -> bool {
        let source_size = self.entries[source].size;
        let target_size = self.entries[target].size;

        if max_size == 0 {
            return false;
        }
        if target_size.saturating_sub(source_size) >= max_size {
            return false;
        }
        // Large source, tiny target: unhelpful
        if target_size < source_size / 32 {
            return false;
        }

        true
    }

    fn write_header(&mut self) -> anyhow::Result<()> {
        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(SIGNATURE);
        header.write_u32::<BigEndian>(VERSION)?;
        header.write_u32::<BigEndian>(self.entries.len() as u32)?;

        self.write_bytes(&header)
    }

    /// Write one entry, its base first if it has an unwritten one
    fn write_entry(&mut self, index: usize) -> anyhow::Result<()> {
        if let Some(delta) = &self.entries[index].delta {
            let base = delta.base;
            self.write_entry(base)?;
        }
        if self.entries[index].offset.is_some() {
            return Ok(());
        }

        let offset = self.offset;
        self.entries[index].offset = Some(offset);

        let payload = match &self.entries[index].delta {
            Some(delta) => delta.data.clone(),
            None => self.database.load_raw(&self.entries[index].oid)?.data.to_vec(),
        };

        let mut record = Vec::new();
        object_header::write(
            &mut record,
            self.entries[index].packed_kind(self.allow_ofs),
            payload.len() as u64,
        );

        if let Some(delta) = &self.entries[index].delta {
            if self.allow_ofs {
                let base_offset = self.entries[delta.base]
                    .offset
                    .expect("delta base written before its dependant");
                varint_be::write(&mut record, offset - base_offset);
            } else {
                self.entries[delta.base].oid.write_h40_to(&mut record)?;
            }
        }

        let mut encoder =
            flate2::write::ZlibEncoder::new(record, flate2::Compression::default());
        encoder.write_all(&payload)?;
        let record = encoder.finish()?;

        self.write_bytes(&record)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.digest.update(bytes);
        self.output.write_all(bytes)?;
        self.offset += bytes.len() as u64;

        Ok(())
    }
}

//! The pack index (`.idx`) format, version 2
//!
//! ```text
//! magic 0xFF744F63  u32 version=2
//! fan_out[256] u32           cumulative counts by oid[0]
//! oid_table[n] 20 bytes      sorted
//! crc32[n] u32               of each object's bytes in the .pack
//! offset[n] u32              high bit = indirect via ext table
//! ext_offset[] u64           for offsets >= 2^31
//! pack_sha1 20 bytes
//! idx_sha1 20 bytes
//! ```
//!
//! Lookup: the fan-out gives a `[low, high)` range for the OID's first
//! byte, a binary search over the OID table finds the position, and the
//! offset table (dereferenced through the ext table when the high bit is
//! set) gives the pack offset.

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::pack::PackError;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use sha1::{Digest, Sha1};
use std::path::Path;

pub const IDX_SIGNATURE: u32 = 0xFF74_4F63;
pub const IDX_VERSION: u32 = 2;

/// Offsets at or above this bit go through the 64-bit ext table
const EXT_OFFSET_FLAG: u32 = 0x8000_0000;

/// One indexed object
#[derive(Debug, Clone)]
pub struct IdxEntry {
    pub oid: ObjectId,
    pub offset: u64,
    pub crc32: u32,
}

/// Serialize an index for the given entries
///
/// Entries are sorted by OID in place; `pack_digest` is the trailer of the
/// companion `.pack`.
pub fn write_index(entries: &mut [IdxEntry], pack_digest: &[u8; 20]) -> anyhow::Result<Vec<u8>> {
    entries.sort_by(|a, b| a.oid.cmp(&b.oid));

    let mut out = Vec::new();
    out.write_u32::<BigEndian>(IDX_SIGNATURE)?;
    out.write_u32::<BigEndian>(IDX_VERSION)?;

    // Cumulative fan-out
    let mut fanout = [0u32; 256];
    for entry in entries.iter() {
        fanout[entry.oid.fanout_byte() as usize] += 1;
    }
    let mut total = 0u32;
    for count in fanout.iter_mut() {
        total += *count;
        *count = total;
    }
    for count in fanout {
        out.write_u32::<BigEndian>(count)?;
    }

    for entry in entries.iter() {
        entry.oid.write_h40_to(&mut out)?;
    }
    for entry in entries.iter() {
        out.write_u32::<BigEndian>(entry.crc32)?;
    }

    let mut ext_offsets: Vec<u64> = Vec::new();
    for entry in entries.iter() {
        if entry.offset < EXT_OFFSET_FLAG as u64 {
            out.write_u32::<BigEndian>(entry.offset as u32)?;
        } else {
            out.write_u32::<BigEndian>(EXT_OFFSET_FLAG | ext_offsets.len() as u32)?;
            ext_offsets.push(entry.offset);
        }
    }
    for offset in ext_offsets {
        out.write_u64::<BigEndian>(offset)?;
    }

    out.extend_from_slice(pack_digest);

    let digest = Sha1::digest(&out);
    out.extend_from_slice(&digest);

    Ok(out)
}

/// An in-memory pack index
#[derive(Debug)]
pub struct PackIndex {
    fanout: [u32; 256],
    oids: Vec<ObjectId>,
    crcs: Vec<u32>,
    offsets: Vec<u32>,
    ext_offsets: Vec<u64>,
    pack_digest: [u8; 20],
}

impl PackIndex {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> anyhow::Result<Self> {
        if bytes.len() < 8 + 256 * 4 + 40 {
            return Err(PackError::Corrupt("index file too short".to_string()).into());
        }

        // Checksum of everything before the final digest
        let stored = &bytes[bytes.len() - 20..];
        let computed = Sha1::digest(&bytes[..bytes.len() - 20]);
        if stored != computed.as_slice() {
            return Err(PackError::Corrupt("index checksum mismatch".to_string()).into());
        }

        if BigEndian::read_u32(&bytes[0..4]) != IDX_SIGNATURE {
            return Err(PackError::Corrupt("bad index signature".to_string()).into());
        }
        if BigEndian::read_u32(&bytes[4..8]) != IDX_VERSION {
            return Err(PackError::Corrupt("unsupported index version".to_string()).into());
        }

        let mut fanout = [0u32; 256];
        for (i, slot) in fanout.iter_mut().enumerate() {
            *slot = BigEndian::read_u32(&bytes[8 + 4 * i..12 + 4 * i]);
        }
        let count = fanout[255] as usize;

        let oid_table = 8 + 256 * 4;
        let crc_table = oid_table + 20 * count;
        let offset_table = crc_table + 4 * count;
        let ext_table = offset_table + 4 * count;

        if bytes.len() < ext_table + 40 {
            return Err(PackError::Corrupt("index tables truncated".to_string()).into());
        }

        let mut oids = Vec::with_capacity(count);
        for i in 0..count {
            oids.push(ObjectId::from_raw_bytes(
                &bytes[oid_table + 20 * i..oid_table + 20 * (i + 1)],
            )?);
        }

        let mut crcs = Vec::with_capacity(count);
        let mut offsets = Vec::with_capacity(count);
        let mut ext_needed = 0usize;
        for i in 0..count {
            crcs.push(BigEndian::read_u32(&bytes[crc_table + 4 * i..]));
            let offset = BigEndian::read_u32(&bytes[offset_table + 4 * i..]);
            if offset & EXT_OFFSET_FLAG != 0 {
                ext_needed = ext_needed.max((offset & !EXT_OFFSET_FLAG) as usize + 1);
            }
            offsets.push(offset);
        }

        let mut ext_offsets = Vec::with_capacity(ext_needed);
        for i in 0..ext_needed {
            ext_offsets.push(u64::from_be_bytes(
                bytes[ext_table + 8 * i..ext_table + 8 * (i + 1)].try_into()?,
            ));
        }

        let trailer = ext_table + 8 * ext_needed;
        let mut pack_digest = [0u8; 20];
        pack_digest.copy_from_slice(&bytes[trailer..trailer + 20]);

        Ok(PackIndex {
            fanout,
            oids,
            crcs,
            offsets,
            ext_offsets,
            pack_digest,
        })
    }

    pub fn len(&self) -> usize {
        self.oids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oids.is_empty()
    }

    pub fn oids(&self) -> &[ObjectId] {
        &self.oids
    }

    pub fn pack_digest(&self) -> &[u8; 20] {
        &self.pack_digest
    }

    pub fn has(&self, oid: &ObjectId) -> bool {
        self.position_of(oid).is_some()
    }

    /// The pack offset of an object, if present
    pub fn offset_for(&self, oid: &ObjectId) -> Option<u64> {
        let position = self.position_of(oid)?;
        let offset = self.offsets[position];

        if offset & EXT_OFFSET_FLAG == 0 {
            Some(offset as u64)
        } else {
            self.ext_offsets
                .get((offset & !EXT_OFFSET_FLAG) as usize)
                .copied()
        }
    }

    pub fn crc_for(&self, oid: &ObjectId) -> Option<u32> {
        self.position_of(oid).map(|position| self.crcs[position])
    }

    fn position_of(&self, oid: &ObjectId) -> Option<usize> {
        let (low, high) = self.fanout_range(oid.fanout_byte());
        self.oids[low..high]
            .binary_search(oid)
            .ok()
            .map(|i| low + i)
    }

    fn fanout_range(&self, first_byte: u8) -> (usize, usize) {
        let high = self.fanout[first_byte as usize] as usize;
        let low = if first_byte == 0 {
            0
        } else {
            self.fanout[first_byte as usize - 1] as usize
        };
        (low, high)
    }

    /// OIDs whose hex form begins with the prefix
    pub fn prefix_match(&self, prefix: &str) -> Vec<ObjectId> {
        let (low, high) = if prefix.len() >= 2 {
            match u8::from_str_radix(&prefix[..2], 16) {
                Ok(byte) => self.fanout_range(byte),
                Err(_) => return Vec::new(),
            }
        } else {
            (0, self.oids.len())
        };

        self.oids[low..high]
            .iter()
            .filter(|oid| oid.as_ref().starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn oid(fill: u8) -> ObjectId {
        ObjectId::try_parse(format!("{:02x}", fill).repeat(20)).unwrap()
    }

    fn sample_entries() -> Vec<IdxEntry> {
        vec![
            IdxEntry {
                oid: oid(0xce),
                offset: 12,
                crc32: 111,
            },
            IdxEntry {
                oid: oid(0x01),
                offset: 99,
                crc32: 222,
            },
            IdxEntry {
                oid: oid(0xce).clone(),
                offset: 0,
                crc32: 0,
            },
        ]
    }

    #[test]
    fn test_write_then_lookup() {
        let mut entries = vec![
            IdxEntry {
                oid: oid(0x01),
                offset: 12,
                crc32: 42,
            },
            IdxEntry {
                oid: oid(0xab),
                offset: 345,
                crc32: 43,
            },
            IdxEntry {
                oid: oid(0xac),
                offset: 678,
                crc32: 44,
            },
        ];

        let bytes = write_index(&mut entries, &[7u8; 20]).unwrap();
        let index = PackIndex::parse(&bytes).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.offset_for(&oid(0x01)), Some(12));
        assert_eq!(index.offset_for(&oid(0xab)), Some(345));
        assert_eq!(index.offset_for(&oid(0xac)), Some(678));
        assert_eq!(index.offset_for(&oid(0x44)), None);
        assert_eq!(index.crc_for(&oid(0xab)), Some(43));
        assert_eq!(index.pack_digest(), &[7u8; 20]);
    }

    #[test]
    fn test_large_offsets_go_through_ext_table() {
        let mut entries = vec![
            IdxEntry {
                oid: oid(0x10),
                offset: 5,
                crc32: 0,
            },
            IdxEntry {
                oid: oid(0x20),
                offset: 1 << 33,
                crc32: 0,
            },
        ];

        let bytes = write_index(&mut entries, &[0u8; 20]).unwrap();
        let index = PackIndex::parse(&bytes).unwrap();

        assert_eq!(index.offset_for(&oid(0x10)), Some(5));
        assert_eq!(index.offset_for(&oid(0x20)), Some(1 << 33));
    }

    #[test]
    fn test_corrupted_index_is_rejected() {
        let mut entries = sample_entries();
        let mut bytes = write_index(&mut entries[..2], &[0u8; 20]).unwrap();
        bytes[100] ^= 0xff;

        assert!(PackIndex::parse(&bytes).is_err());
    }

    #[test]
    fn test_prefix_match_uses_fanout() {
        let mut entries = sample_entries();
        let bytes = write_index(&mut entries[..2], &[0u8; 20]).unwrap();
        let index = PackIndex::parse(&bytes).unwrap();

        assert_eq!(index.prefix_match("ce"), vec![oid(0xce)]);
        assert_eq!(index.prefix_match("cece"), vec![oid(0xce)]);
        assert!(index.prefix_match("cf").is_empty());
    }
}

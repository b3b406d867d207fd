//! Binary delta compression (XDelta)
//!
//! A delta stream opens with the varint sizes of its source and target,
//! followed by operations:
//! - `INSERT` (top bit clear): the next `n = byte & 0x7f` bytes are literal
//!   output, `0 < n <= 127`
//! - `COPY` (top bit set): the low 7 bits select which offset/size operand
//!   bytes follow; copy `size` bytes from `source[offset..]` (`size = 0`
//!   means 0x10000, capped at 0xFFFFFF)
//!
//! The compressor indexes the source by every 16-byte block, finds the
//! longest forward match for each target position, and extends matches
//! backwards through pending literal bytes.

use crate::artifacts::pack::numbers::{packed56_le, varint_le};
use crate::artifacts::pack::{MAX_COPY_SIZE, MAX_INSERT_SIZE};
use bytes::Bytes;
use std::collections::HashMap;
use std::io::{self, Read};

/// Block granularity of the source index
pub const BLOCK_SIZE: usize = 16;

/// A single delta operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Insert(Vec<u8>),
    Copy { offset: usize, size: usize },
}

impl Op {
    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Op::Insert(data) => {
                out.push(data.len() as u8);
                out.extend_from_slice(data);
            }
            Op::Copy { offset, size } => {
                // A full 0x10000 copy is encoded as size zero
                let encoded_size = if *size == 0x10000 { 0 } else { *size };
                let (bitmap, operands) = packed56_le::write(*offset as u64, encoded_size as u64);
                out.push(0x80 | bitmap);
                out.extend(operands);
            }
        }
    }

    pub fn read(reader: &mut impl Read) -> io::Result<Op> {
        let mut first = [0u8; 1];
        reader.read_exact(&mut first)?;
        let first = first[0];

        if first & 0x80 != 0 {
            let (offset, size) = packed56_le::read(reader, first & 0x7f)?;
            let size = if size == 0 { 0x10000 } else { size as usize };
            Ok(Op::Copy {
                offset: offset as usize,
                size,
            })
        } else {
            if first == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "reserved zero-length insert op",
                ));
            }
            let mut data = vec![0u8; first as usize];
            reader.read_exact(&mut data)?;
            Ok(Op::Insert(data))
        }
    }

    /// Bytes this op contributes to the expanded output
    pub fn output_size(&self) -> usize {
        match self {
            Op::Insert(data) => data.len(),
            Op::Copy { size, .. } => *size,
        }
    }
}

/// Source index for delta compression
///
/// Owns the source bytes plus a map from each aligned 16-byte block to the
/// offsets where it occurs. Building the index once per source lets one
/// source serve many targets as the window slides.
#[derive(Debug)]
pub struct XDelta {
    source: Bytes,
    index: HashMap<[u8; BLOCK_SIZE], Vec<usize>>,
}

impl XDelta {
    pub fn create_index(source: Bytes) -> Self {
        let blocks = source.len() / BLOCK_SIZE;
        let mut index: HashMap<[u8; BLOCK_SIZE], Vec<usize>> = HashMap::new();

        for i in 0..blocks {
            let offset = i * BLOCK_SIZE;
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(&source[offset..offset + BLOCK_SIZE]);
            index.entry(block).or_default().push(offset);
        }

        XDelta { source, index }
    }

    pub fn source_len(&self) -> usize {
        self.source.len()
    }

    /// Produce the op sequence transforming the source into the target
    pub fn compress(&self, target: &[u8]) -> Vec<Op> {
        let mut ops = Vec::new();
        let mut insert: Vec<u8> = Vec::new();
        let mut offset = 0;

        while offset < target.len() {
            let (m_offset, m_size) = self.longest_match(target, offset);

            if m_size == 0 {
                insert.push(target[offset]);
                offset += 1;
                if insert.len() == MAX_INSERT_SIZE {
                    Self::flush_insert(&mut ops, &mut insert);
                }
                continue;
            }

            offset += m_size;

            // Expand the match backwards through pending literals
            let (mut c_offset, mut c_size) = (m_offset, m_size);
            while c_offset > 0
                && c_size < MAX_COPY_SIZE
                && insert.last() == Some(&self.source[c_offset - 1])
            {
                c_offset -= 1;
                c_size += 1;
                insert.pop();
            }

            Self::flush_insert(&mut ops, &mut insert);
            ops.push(Op::Copy {
                offset: c_offset,
                size: c_size,
            });
        }

        Self::flush_insert(&mut ops, &mut insert);
        ops
    }

    fn flush_insert(ops: &mut Vec<Op>, insert: &mut Vec<u8>) {
        if insert.is_empty() {
            return;
        }
        ops.push(Op::Insert(std::mem::take(insert)));
    }

    fn longest_match(&self, target: &[u8], offset: usize) -> (usize, usize) {
        if offset + BLOCK_SIZE > target.len() {
            return (0, 0);
        }

        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&target[offset..offset + BLOCK_SIZE]);

        let Some(positions) = self.index.get(&block) else {
            return (0, 0);
        };

        let mut best = (0usize, 0usize);
        for &position in positions {
            let limit = (self.source.len() - position)
                .min(target.len() - offset)
                .min(MAX_COPY_SIZE);

            let mut length = BLOCK_SIZE;
            while length < limit
                && self.source[position + length] == target[offset + length]
            {
                length += 1;
            }

            if length > best.1 {
                best = (position, length);
            }
        }

        best
    }
}

/// Build the complete delta stream for a source/target pair
pub fn compress(source: &XDelta, target: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();

    varint_le::write(&mut data, source.source_len() as u64);
    varint_le::write(&mut data, target.len() as u64);

    for op in source.compress(target) {
        op.write(&mut data);
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::pack::expander::Expander;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identical_input_is_one_copy() {
        let source = Bytes::from(vec![7u8; 64]);
        let index = XDelta::create_index(source.clone());

        let ops = index.compress(&source);

        assert_eq!(
            ops,
            vec![Op::Copy {
                offset: 0,
                size: 64
            }]
        );
    }

    #[test]
    fn test_unrelated_input_is_all_inserts() {
        let source = Bytes::from_static(b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let index = XDelta::create_index(source);

        let ops = index.compress(b"zzz");

        assert_eq!(ops, vec![Op::Insert(b"zzz".to_vec())]);
    }

    #[test]
    fn test_round_trip_with_edit_in_the_middle() {
        let source: Vec<u8> = (0..255u8).cycle().take(4096).collect();
        let mut target = source.clone();
        target[2000] ^= 0xff;
        target.splice(100..100, b"inserted run".iter().copied());

        let index = XDelta::create_index(Bytes::from(source.clone()));
        let delta = compress(&index, &target);

        let expanded = Expander::expand(&source, &delta).unwrap();
        assert_eq!(expanded, target);
        assert!(delta.len() < target.len(), "delta must beat the raw target");
    }

    #[test]
    fn test_one_byte_change_yields_small_delta() {
        let source: Vec<u8> = (0..64u8).cycle().take(1 << 16).collect();
        let mut target = source.clone();
        target[1234] = 0xff;

        let index = XDelta::create_index(Bytes::from(source.clone()));
        let delta = compress(&index, &target);

        assert!(delta.len() < 128, "got {} byte delta", delta.len());
        assert_eq!(Expander::expand(&source, &delta).unwrap(), target);
    }

    #[test]
    fn test_insert_runs_flush_at_127_bytes() {
        let source = Bytes::from_static(b"0123456789abcdef");
        let index = XDelta::create_index(source);
        let target = vec![1u8; 300];

        let ops = index.compress(&target);

        assert!(ops.iter().all(|op| match op {
            Op::Insert(data) => data.len() <= MAX_INSERT_SIZE,
            _ => false,
        }));
        assert_eq!(ops.iter().map(Op::output_size).sum::<usize>(), 300);
    }
}

//! Delta application
//!
//! Rebuilds a target object from its base and a delta stream, validating
//! the declared source and target sizes and every copy range.

use crate::artifacts::pack::delta::Op;
use crate::artifacts::pack::numbers::varint_le;
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("corrupt delta stream: {0}")]
    Corrupt(&'static str),
    #[error("IO failure in delta stream: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Expander;

impl Expander {
    /// Apply a delta to its base, producing the target bytes
    pub fn expand(source: &[u8], delta: &[u8]) -> Result<Vec<u8>, DeltaError> {
        let mut reader = Cursor::new(delta);

        let source_size = varint_le::read(&mut reader)? as usize;
        if source_size != source.len() {
            return Err(DeltaError::Corrupt("declared source size does not match base"));
        }

        let target_size = varint_le::read(&mut reader)? as usize;
        let mut target = Vec::with_capacity(target_size);

        while (reader.position() as usize) < delta.len() {
            match Op::read(&mut reader)? {
                Op::Insert(data) => target.extend_from_slice(&data),
                Op::Copy { offset, size } => {
                    let end = offset
                        .checked_add(size)
                        .ok_or(DeltaError::Corrupt("copy range overflows"))?;
                    if end > source.len() {
                        return Err(DeltaError::Corrupt("copy range exceeds base"));
                    }
                    target.extend_from_slice(&source[offset..end]);
                }
            }

            if target.len() > target_size {
                return Err(DeltaError::Corrupt("expansion exceeds declared target size"));
            }
        }

        if target.len() != target_size {
            return Err(DeltaError::Corrupt("expansion fell short of declared target size"));
        }

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::pack::delta;
    use crate::artifacts::pack::delta::XDelta;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn build_delta(source: &[u8], target: &[u8]) -> Vec<u8> {
        let index = XDelta::create_index(Bytes::from(source.to_vec()));
        delta::compress(&index, target)
    }

    #[test]
    fn test_expand_round_trip() {
        let source = b"the quick brown fox jumps over the lazy dog".repeat(8);
        let target = b"the quick brown cat naps over the lazy dog!!".repeat(8);

        let stream = build_delta(&source, &target);
        assert_eq!(Expander::expand(&source, &stream).unwrap(), target);
    }

    #[test]
    fn test_wrong_base_is_rejected() {
        let source = vec![1u8; 256];
        let target = vec![2u8; 256];
        let stream = build_delta(&source, &target);

        let err = Expander::expand(&source[..100], &stream).unwrap_err();
        assert!(matches!(err, DeltaError::Corrupt(_)));
    }

    #[test]
    fn test_copy_past_end_of_base_is_rejected() {
        let mut stream = Vec::new();
        crate::artifacts::pack::numbers::varint_le::write(&mut stream, 4);
        crate::artifacts::pack::numbers::varint_le::write(&mut stream, 8);
        delta::Op::Copy { offset: 2, size: 8 }.write(&mut stream);

        let err = Expander::expand(&[0, 1, 2, 3], &stream).unwrap_err();
        assert!(matches!(err, DeltaError::Corrupt("copy range exceeds base")));
    }

    #[test]
    fn test_truncated_expansion_is_rejected() {
        let mut stream = Vec::new();
        crate::artifacts::pack::numbers::varint_le::write(&mut stream, 2);
        crate::artifacts::pack::numbers::varint_le::write(&mut stream, 10);
        delta::Op::Insert(vec![9, 9]).write(&mut stream);

        let err = Expander::expand(&[7, 7], &stream).unwrap_err();
        assert!(matches!(err, DeltaError::Corrupt(_)));
    }
}

//! Pack stream parsing
//!
//! Reads the `PACK` header and individual records from a [`Stream`]. Delta
//! records are returned unapplied, carrying either their base OID
//! (REF_DELTA) or the absolute offset of their base within the same pack
//! (OFS_DELTA, already rebased from the encoded negative offset).

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::pack::numbers::{object_header, varint_be};
use crate::artifacts::pack::stream::{Stream, StreamReader};
use crate::artifacts::pack::{
    BLOB, COMMIT, OFS_DELTA, PackError, REF_DELTA, SIGNATURE, TREE, VERSION,
};
use flate2::{Decompress, FlushDecompress, Status};
use std::io::Read;

#[derive(Debug, Clone)]
pub enum Record {
    Simple { kind: u8, data: Vec<u8> },
    OfsDelta { base_offset: u64, delta: Vec<u8> },
    RefDelta { base_oid: ObjectId, delta: Vec<u8> },
}

pub struct Reader<R: Read> {
    pub stream: Stream<R>,
    pub count: u32,
}

impl<R: Read> Reader<R> {
    pub fn new(input: R) -> Self {
        Self::from_stream(Stream::new(input))
    }

    pub fn from_stream(stream: Stream<R>) -> Self {
        Reader { stream, count: 0 }
    }

    /// Parse `"PACK" <version> <object count>`
    pub fn read_header(&mut self) -> Result<(), PackError> {
        let signature = self.stream.read(4)?;
        if signature != SIGNATURE {
            return Err(PackError::Corrupt("bad pack signature".to_string()));
        }

        let version = u32::from_be_bytes(self.stream.read(4)?.try_into().unwrap());
        if version != VERSION {
            return Err(PackError::Corrupt(format!(
                "unsupported pack version {}",
                version
            )));
        }

        self.count = u32::from_be_bytes(self.stream.read(4)?.try_into().unwrap());

        Ok(())
    }

    /// Read the record at the current offset
    ///
    /// Returns the record's offset within the pack along with its parsed
    /// form; the payload is already inflated and validated against the
    /// declared size.
    pub fn read_record(&mut self) -> Result<(u64, Record), PackError> {
        let offset = self.stream.offset;

        let (kind, size) = object_header::read(&mut StreamReader(&mut self.stream))?;

        let record = match kind {
            COMMIT | TREE | BLOB => Record::Simple {
                kind,
                data: self.inflate(size)?,
            },
            OFS_DELTA => {
                let back = varint_be::read(&mut StreamReader(&mut self.stream))?;
                let base_offset = offset.checked_sub(back).ok_or_else(|| {
                    PackError::Corrupt("ofs-delta base precedes start of pack".to_string())
                })?;
                Record::OfsDelta {
                    base_offset,
                    delta: self.inflate(size)?,
                }
            }
            REF_DELTA => {
                let raw = self.stream.read(20)?;
                let base_oid = ObjectId::from_raw_bytes(&raw)
                    .map_err(|err| PackError::Corrupt(err.to_string()))?;
                Record::RefDelta {
                    base_oid,
                    delta: self.inflate(size)?,
                }
            }
            _ => {
                return Err(PackError::Corrupt(format!(
                    "unknown pack record type {}",
                    kind
                )));
            }
        };

        Ok((offset, record))
    }

    /// Inflate one zlib stream, consuming exactly its compressed bytes
    fn inflate(&mut self, expected_size: u64) -> Result<Vec<u8>, PackError> {
        let mut inflater = Decompress::new(true);
        let mut output = Vec::with_capacity(expected_size as usize);

        loop {
            let input = self.stream.peek(8 * 1024)?.to_vec();
            if input.is_empty() {
                return Err(PackError::Corrupt("truncated zlib stream".to_string()));
            }

            output.reserve(32 * 1024);
            let before_in = inflater.total_in();
            let status = inflater
                .decompress_vec(&input, &mut output, FlushDecompress::None)
                .map_err(|err| PackError::Corrupt(format!("zlib failure: {}", err)))?;

            let consumed = (inflater.total_in() - before_in) as usize;
            self.stream.consume(consumed)?;

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => continue,
            }
        }

        if output.len() as u64 != expected_size {
            return Err(PackError::Corrupt(format!(
                "record inflated to {} bytes, header declared {}",
                output.len(),
                expected_size
            )));
        }

        Ok(output)
    }

    /// Verify and return the pack trailer digest
    pub fn verify_trailer(&mut self) -> Result<[u8; 20], PackError> {
        self.stream.verify_trailer()
    }
}

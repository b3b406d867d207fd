//! Running SHA-1 framing for the index file
//!
//! Every byte read from or written to the index passes through a running
//! digest; the file ends with the digest of everything before it. A trailer
//! mismatch on read raises a corruption error before any entry is trusted.

use crate::artifacts::index::CHECKSUM_SIZE;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("Checksum does not match value stored on disk")]
    Corrupt,
    #[error("IO failure while checksumming index: {0}")]
    Io(#[from] std::io::Error),
}

/// A reader or writer that hashes everything passing through it
#[derive(Debug)]
pub struct Checksum<IO> {
    io: IO,
    digest: Sha1,
}

impl<IO> Checksum<IO> {
    pub fn new(io: IO) -> Self {
        Checksum {
            io,
            digest: Sha1::new(),
        }
    }
}

impl<R: Read> Checksum<R> {
    /// Read exactly `size` bytes, feeding them into the running digest
    pub fn read(&mut self, size: usize) -> Result<Bytes, ChecksumError> {
        let mut buffer = vec![0u8; size];
        self.io.read_exact(&mut buffer)?;
        self.digest.update(&buffer);

        Ok(Bytes::from(buffer))
    }

    /// Read the stored trailer and compare it against the running digest
    pub fn verify(mut self) -> Result<(), ChecksumError> {
        let mut stored = [0u8; CHECKSUM_SIZE];
        self.io.read_exact(&mut stored)?;

        let computed = self.digest.finalize();
        if computed.as_slice() != stored {
            return Err(ChecksumError::Corrupt);
        }

        Ok(())
    }
}

impl<W: Write> Checksum<W> {
    /// Write bytes, feeding them into the running digest
    pub fn write(&mut self, data: &[u8]) -> Result<(), ChecksumError> {
        self.io.write_all(data)?;
        self.digest.update(data);

        Ok(())
    }

    /// Emit the trailer: the digest of everything written so far
    pub fn write_checksum(mut self) -> Result<W, ChecksumError> {
        let digest = self.digest.finalize();
        self.io.write_all(&digest)?;

        Ok(self.io)
    }
}

//! Incremental pack-stream input
//!
//! Wraps any reader with the bookkeeping pack parsing needs: a byte offset,
//! a running SHA-1 over everything consumed (for the trailer check), an
//! optional capture buffer (for per-record CRCs), and an optional tee that
//! copies consumed bytes to a file (the indexer's pack copy). Consumption
//! is byte-precise: the zlib inflater peeks at buffered input and consumes
//! exactly what it used, so record boundaries stay intact.

use crate::artifacts::pack::PackError;
use sha1::{Digest, Sha1};
use std::io::{self, Read, Write};

/// How many bytes to pull from the underlying reader at a time
const CHUNK_SIZE: usize = 8 * 1024;

pub struct Stream<R: Read> {
    input: R,
    /// Offset of the next unconsumed byte, from the start of the pack
    pub offset: u64,
    buffer: Vec<u8>,
    digest: Sha1,
    capture: Option<Vec<u8>>,
    tee: Option<Box<dyn Write>>,
}

impl<R: Read> Stream<R> {
    pub fn new(input: R) -> Self {
        Self::with_offset(input, 0)
    }

    /// A stream positioned mid-pack (for re-reading records from disk)
    pub fn with_offset(input: R, offset: u64) -> Self {
        Stream {
            input,
            offset,
            buffer: Vec::new(),
            digest: Sha1::new(),
            capture: None,
            tee: None,
        }
    }

    /// Copy every byte consumed from here on (including the trailer) to a
    /// writer
    ///
    /// Must be installed before any byte is consumed for the copy to be a
    /// faithful pack.
    pub fn set_tee(&mut self, tee: Box<dyn Write>) {
        self.tee = Some(tee);
    }

    fn fill(&mut self, want: usize) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK_SIZE];

        while self.buffer.len() < want {
            let n = self.input.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }

        Ok(())
    }

    /// Look at up to `want` buffered bytes without consuming them
    ///
    /// May return fewer bytes near end of input; an empty slice means EOF.
    pub fn peek(&mut self, want: usize) -> io::Result<&[u8]> {
        self.fill(want)?;
        let available = self.buffer.len().min(want);
        Ok(&self.buffer[..available])
    }

    /// Consume `n` previously peeked bytes
    pub fn consume(&mut self, n: usize) -> io::Result<Vec<u8>> {
        assert!(n <= self.buffer.len(), "consume beyond buffered input");

        let bytes: Vec<u8> = self.buffer.drain(..n).collect();
        self.digest.update(&bytes);
        if let Some(capture) = &mut self.capture {
            capture.extend_from_slice(&bytes);
        }
        if let Some(tee) = &mut self.tee {
            tee.write_all(&bytes)?;
        }
        self.offset += n as u64;

        Ok(bytes)
    }

    /// Read exactly `n` bytes
    pub fn read(&mut self, n: usize) -> io::Result<Vec<u8>> {
        self.fill(n)?;
        if self.buffer.len() < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "pack stream ended early",
            ));
        }

        self.consume(n)
    }

    pub fn read_byte(&mut self) -> io::Result<u8> {
        Ok(self.read(1)?[0])
    }

    /// Begin recording consumed bytes (for CRC computation)
    pub fn begin_capture(&mut self) {
        self.capture = Some(Vec::new());
    }

    /// Stop recording and return what was consumed since `begin_capture`
    pub fn end_capture(&mut self) -> Vec<u8> {
        self.capture.take().unwrap_or_default()
    }

    /// Read the 20-byte trailer and compare it to the running digest
    ///
    /// Returns the stored digest (the pack's name) on success.
    pub fn verify_trailer(&mut self) -> Result<[u8; 20], PackError> {
        let expected = self.digest.clone().finalize();

        let stored = self.read(20)?;
        let mut trailer = [0u8; 20];
        trailer.copy_from_slice(&stored);

        if expected.as_slice() != trailer {
            return Err(PackError::Corrupt(
                "pack trailer does not match stream digest".to_string(),
            ));
        }

        Ok(trailer)
    }

    /// Flush and drop the tee writer
    pub fn finish_tee(&mut self) -> io::Result<()> {
        if let Some(mut tee) = self.tee.take() {
            tee.flush()?;
        }
        Ok(())
    }
}

/// Byte-by-byte `Read` adapter for the varint decoders
pub struct StreamReader<'s, R: Read>(pub &'s mut Stream<R>);

impl<R: Read> Read for StreamReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        buf[0] = self.0.read_byte()?;
        Ok(1)
    }
}

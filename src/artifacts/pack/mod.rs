//! The pack codec
//!
//! A pack is the bulk container of objects: a `PACK` stream with per-object
//! headers and zlib-deflated payloads (possibly delta-encoded against other
//! objects), followed by a SHA-1 trailer, paired with a v2 `.idx` index for
//! random access.
//!
//! - `numbers`: the variable-length integer encodings of the format
//! - `delta` / `expander`: binary delta compression and application
//! - `entry` / `window` / `writer`: the pack encoder
//! - `stream` / `reader`: incremental stream parsing
//! - `idx`: the pack index format
//! - `unpacker` / `indexer`: the two strategies for receiving a pack

pub mod delta;
pub mod entry;
pub mod expander;
pub mod idx;
pub mod indexer;
pub mod numbers;
pub mod reader;
pub mod stream;
pub mod unpacker;
pub mod window;
pub mod writer;

use thiserror::Error;

/// Stream signature
pub const SIGNATURE: &[u8; 4] = b"PACK";
/// Stream format version
pub const VERSION: u32 = 2;

/// Pack record type codes
pub const COMMIT: u8 = 1;
pub const TREE: u8 = 2;
pub const BLOB: u8 = 3;
pub const OFS_DELTA: u8 = 6;
pub const REF_DELTA: u8 = 7;

/// Largest size a single COPY op can produce
pub const MAX_COPY_SIZE: usize = 0xffffff;
/// Largest run a single INSERT op can carry
pub const MAX_INSERT_SIZE: usize = 0x7f;

/// Packs with fewer objects than this are exploded into loose objects
pub const DEFAULT_UNPACK_LIMIT: u32 = 100;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("corrupt pack: {0}")]
    Corrupt(String),
    #[error("IO failure in pack stream: {0}")]
    Io(#[from] std::io::Error),
}

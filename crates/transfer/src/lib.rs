//! Chunk planning, hashing and byte sources for resumable uploads.
//!
//! A file is split into fixed-size [`ChunkInfo`] ranges. Each range is read
//! from a [`ChunkSource`] and tagged with its SHA-256 so the server can
//! verify it independently of the other chunks.

mod chunked;
mod progress;
mod source;

pub use chunked::{
    ChunkInfo, checksum_bytes, checksum_offloaded, checksum_source, pending_chunks, plan_chunks,
    total_chunks,
};
pub use progress::SpeedCalculator;
pub use source::{ChunkSource, FileSource, MemorySource, ReadFuture};

/// Block size used when streaming a whole source through the hasher.
pub const HASH_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("file needs {0} chunks, more than chunk numbers can address")]
    TooManyChunks(u64),

    #[error("range {start}..{end} is outside source of {len} bytes")]
    OutOfRange { start: u64, end: u64, len: u64 },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

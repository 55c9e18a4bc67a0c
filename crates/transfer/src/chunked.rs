use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::source::ChunkSource;
use crate::{HASH_BLOCK_SIZE, TransferError};

/// One fixed-size byte range of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// 0-based sequence index.
    pub number: u32,
    /// First byte offset (inclusive).
    pub start: u64,
    /// Last byte offset (exclusive).
    pub end: u64,
    /// Hex SHA-256 of the chunk bytes, once read.
    pub hash: Option<String>,
    /// Retries performed so far (attempts minus one).
    pub retry_count: u32,
}

impl ChunkInfo {
    /// Returns chunk `number` of a `total_size` file, or `None` past the end.
    pub fn for_number(number: u32, total_size: u64, chunk_size: u64) -> Option<Self> {
        let start = u64::from(number).checked_mul(chunk_size)?;
        if chunk_size == 0 || start >= total_size {
            return None;
        }
        Some(Self {
            number,
            start,
            end: start.saturating_add(chunk_size).min(total_size),
            hash: None,
            retry_count: 0,
        })
    }

    /// Size of this chunk in bytes.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }
}

// ---------------------------------------------------------------------------
// Chunk planning
// ---------------------------------------------------------------------------

/// Returns `ceil(total_size / chunk_size)`.
pub fn total_chunks(total_size: u64, chunk_size: u64) -> Result<u32, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize);
    }
    let count = total_size.div_ceil(chunk_size);
    u32::try_from(count).map_err(|_| TransferError::TooManyChunks(count))
}

/// Partitions `[0, total_size)` into consecutive chunks of `chunk_size`.
///
/// The last chunk is truncated to the remaining bytes. An empty file has
/// no chunks.
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Result<Vec<ChunkInfo>, TransferError> {
    let count = total_chunks(total_size, chunk_size)?;
    Ok((0..count)
        .filter_map(|number| ChunkInfo::for_number(number, total_size, chunk_size))
        .collect())
}

/// Plans the chunks that still need uploading, skipping `uploaded` indices.
pub fn pending_chunks(
    total_size: u64,
    chunk_size: u64,
    uploaded: &[u32],
) -> Result<Vec<ChunkInfo>, TransferError> {
    let done: BTreeSet<u32> = uploaded.iter().copied().collect();
    let mut chunks = plan_chunks(total_size, chunk_size)?;
    chunks.retain(|c| !done.contains(&c.number));
    Ok(chunks)
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hashes `data` on the blocking pool and hands the buffer back.
pub async fn checksum_offloaded(data: Vec<u8>) -> Result<(Vec<u8>, String), TransferError> {
    let result = tokio::task::spawn_blocking(move || {
        let digest = checksum_bytes(&data);
        (data, digest)
    })
    .await?;
    Ok(result)
}

/// Streams a whole source through SHA-256 in [`HASH_BLOCK_SIZE`] blocks.
///
/// Only one block is held in memory at a time and each block is hashed
/// off the async worker threads.
pub async fn checksum_source(source: &dyn ChunkSource) -> Result<String, TransferError> {
    let len = source.len();
    let mut hasher = Sha256::new();
    let mut offset = 0u64;

    while offset < len {
        let end = (offset + HASH_BLOCK_SIZE).min(len);
        let block = source.read_range(offset, end).await?;
        hasher = tokio::task::spawn_blocking(move || {
            hasher.update(&block);
            hasher
        })
        .await?;
        offset = end;
    }

    Ok(hex::encode(hasher.finalize()))
}

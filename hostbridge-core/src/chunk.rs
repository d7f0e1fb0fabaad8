//! Chunk ranges: split a payload for delivery, validate incoming ranges.

use crate::config::ChunkOrder;
use crate::core::TransferError;

/// Default chunk size in bytes, used by hosts that have no preference.
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024; // 512 KiB

/// Half-open byte range `[start, end)` within a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    pub start: usize,
    pub end: usize,
}

impl ChunkRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `total_len` bytes into consecutive ranges of `chunk_size` (last one may be shorter).
pub fn split_into_chunks(total_len: usize, chunk_size: usize) -> Vec<ChunkRange> {
    let size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < total_len {
        let end = (start + size).min(total_len);
        out.push(ChunkRange { start, end });
        start = end;
    }
    out
}

/// Check an incoming chunk against the session it targets.
/// `next_offset` is the end of the previous chunk (0 for a fresh session).
pub fn check_chunk(
    start: usize,
    end: usize,
    bytes_len: usize,
    next_offset: usize,
    order: ChunkOrder,
    limit: usize,
) -> Result<ChunkRange, TransferError> {
    if start > end || bytes_len < end - start {
        return Err(TransferError::InvalidRange {
            start,
            end,
            len: bytes_len,
        });
    }
    if end > limit {
        return Err(TransferError::TooLarge { end, limit });
    }
    if order == ChunkOrder::Strict && start < next_offset {
        return Err(TransferError::OutOfOrder {
            start,
            expected: next_offset,
        });
    }
    Ok(ChunkRange { start, end })
}

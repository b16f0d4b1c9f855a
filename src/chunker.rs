use crate::models::FileHandle;
use std::io;
use std::ops::Range;

/// Number of `chunk_size` chunks needed to cover `size` bytes. `chunk_size` must be non-zero.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    size.div_ceil(chunk_size)
}

/// Byte range of chunk `index`: `[index * chunk_size, min((index + 1) * chunk_size, size))`.
pub fn chunk_range(index: u64, chunk_size: u64, size: u64) -> Range<u64> {
    let start = index.saturating_mul(chunk_size).min(size);
    let end = start.saturating_add(chunk_size).min(size);
    start..end
}

/// Reads chunk `index` of a file of `size` bytes. Reads of different chunks are independent.
pub async fn read_chunk(
    handle: &FileHandle,
    index: u64,
    chunk_size: u64,
    size: u64,
) -> io::Result<Vec<u8>> {
    handle.read_range(chunk_range(index, chunk_size, size)).await
}

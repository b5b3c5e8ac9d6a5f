use std::io::Read;

use sha2::{Digest, Sha256};

use crate::io::ByteSource;
use crate::types::Digester;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Streaming SHA-256 digester (lowercase hex).
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digester;

impl Digester for Sha256Digester {
    fn digest(&self, reader: &mut dyn Read) -> std::io::Result<String> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

// ---------------------------------------------------------------------------
// Chunk geometry
// ---------------------------------------------------------------------------

/// Number of chunks needed for `size` bytes: `ceil(size / chunk_size)`.
pub fn total_chunks(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size as u64)
}

/// Byte offset of chunk `index`.
pub fn chunk_offset(index: u64, chunk_size: usize) -> u64 {
    index.saturating_mul(chunk_size as u64)
}

/// Length of chunk `index` in a file of `size` bytes (0 past the end).
pub fn chunk_len(index: u64, size: u64, chunk_size: usize) -> usize {
    let start = chunk_offset(index, chunk_size);
    if start >= size {
        return 0;
    }
    std::cmp::min(size - start, chunk_size as u64) as usize
}

/// Reads the byte range `[index * chunk_size, min(size, (index + 1) * chunk_size))`.
pub(crate) fn read_chunk(
    source: &mut dyn ByteSource,
    index: u64,
    size: u64,
    chunk_size: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; chunk_len(index, size, chunk_size)];
    source.read_at(chunk_offset(index, chunk_size), &mut buf)?;
    Ok(buf)
}

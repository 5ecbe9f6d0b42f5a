//! BLAKE3 chunk identity
//!
//! Every chunk in an index is identified by the BLAKE3 digest of its bytes.
//! Seeds are validated by recomputing this digest over the seed file's data.

use anyhow::{Context, Result};
use std::path::Path;

/// A BLAKE3 hash digest (32 bytes), displayed as 64 hex chars
pub type Hash = blake3::Hash;

/// Content hash of a single chunk. Compared for equality only.
pub type ChunkId = Hash;

/// Hash a byte slice in memory.
pub fn hash_bytes(data: &[u8]) -> Hash {
    blake3::hash(data)
}

/// Hash a whole file without reading it into memory at once
pub fn hash_file_streaming(path: &Path) -> Result<Hash> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)
        .with_context(|| format!("opening file for streaming hash: {}", path.display()))?;

    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024]; // 64KB read buffer

    loop {
        let n = file.read(&mut buf).with_context(|| "reading for hash")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

/// Format a hash as lowercase hex string (64 chars)
pub fn hash_to_hex(hash: &Hash) -> String {
    hash.to_hex().to_string()
}

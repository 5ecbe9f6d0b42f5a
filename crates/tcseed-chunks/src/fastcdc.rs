//! FastCDC content-defined chunking
//!
//! Splits data into variable-size chunks whose boundaries are content-defined,
//! so two files sharing a run of bytes produce the same chunk IDs for that run
//! even when the run sits at different offsets. This is what lets a seed file
//! supply chunks to an unrelated target.
//!
//! Chunk size targets default to min 2KB, avg 4KB, max 16KB and are
//! overridden by the `[chunking]` config section.

use anyhow::{Context, Result};
use std::path::Path;
use tcseed_core::config::ChunkingConfig;
use tracing::debug;

use crate::index::{ChunkDescriptor, ChunkIndex};

/// Chunk size configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSizes {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl ChunkSizes {
    /// Default for most files (small-file optimized)
    pub const SMALL: ChunkSizes = ChunkSizes {
        min_size: 2 * 1024,  // 2KB
        avg_size: 4 * 1024,  // 4KB
        max_size: 16 * 1024, // 16KB
    };
}

impl From<&ChunkingConfig> for ChunkSizes {
    fn from(c: &ChunkingConfig) -> Self {
        Self {
            min_size: c.min_size,
            avg_size: c.avg_size,
            max_size: c.max_size,
        }
    }
}

/// Split `data` into content-defined chunks using FastCDC.
///
/// Offsets are relative to the start of `data`. For empty data, returns an
/// empty list.
pub fn chunk_data(data: &[u8], sizes: ChunkSizes) -> Vec<ChunkDescriptor> {
    if data.is_empty() {
        return vec![];
    }

    let chunker =
        fastcdc::v2020::FastCDC::new(data, sizes.min_size, sizes.avg_size, sizes.max_size);

    chunker
        .map(|c| {
            let chunk_data = &data[c.offset..c.offset + c.length];
            ChunkDescriptor {
                id: crate::blake3::hash_bytes(chunk_data),
                start: c.offset as u64,
                size: c.length as u64,
            }
        })
        .collect()
}

/// Chunk an in-memory buffer into a validated index.
pub fn index_bytes(data: &[u8], sizes: ChunkSizes) -> Result<ChunkIndex> {
    Ok(ChunkIndex::new(chunk_data(data, sizes))?)
}

/// Read a file from disk and build its chunk index.
pub fn index_file(path: &Path, sizes: ChunkSizes) -> Result<ChunkIndex> {
    let data = std::fs::read(path)
        .with_context(|| format!("reading file for chunking: {}", path.display()))?;

    let index = index_bytes(&data, sizes)
        .with_context(|| format!("indexing {}", path.display()))?;
    debug!(
        path = %path.display(),
        bytes = data.len(),
        chunks = index.len(),
        "indexed"
    );
    Ok(index)
}

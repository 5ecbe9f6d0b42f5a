//! Chunk index: how a file's bytes decompose into content-addressed chunks

use tcseed_core::{TcseedError, TcseedResult};

use crate::blake3::ChunkId;

/// One chunk of a file: its content hash and the byte range it covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// BLAKE3 hash of the chunk's bytes
    pub id: ChunkId,
    /// Byte offset of the chunk within its file
    pub start: u64,
    /// Chunk length in bytes
    pub size: u64,
}

impl ChunkDescriptor {
    pub fn new(id: ChunkId, start: u64, size: u64) -> Self {
        Self { id, start, size }
    }

    /// Offset one past the chunk's last byte
    pub fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// Ordered, contiguous list of chunk descriptors.
///
/// Each chunk starts exactly where the previous one ends. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkIndex {
    chunks: Vec<ChunkDescriptor>,
}

impl ChunkIndex {
    /// Build an index, rejecting gaps, overlaps and empty chunks.
    pub fn new(chunks: Vec<ChunkDescriptor>) -> TcseedResult<Self> {
        for (i, c) in chunks.iter().enumerate() {
            if c.size == 0 {
                return Err(TcseedError::Index(format!(
                    "chunk {i} at offset {} has zero size",
                    c.start
                )));
            }
            if i > 0 && chunks[i - 1].end() != c.start {
                return Err(TcseedError::Index(format!(
                    "chunk {i} starts at {} but chunk {} ends at {}",
                    c.start,
                    i - 1,
                    chunks[i - 1].end()
                )));
            }
        }
        Ok(Self { chunks })
    }

    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChunkDescriptor> {
        self.chunks.iter()
    }

    /// Total number of bytes described by the index
    pub fn total_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }
}

impl<'a> IntoIterator for &'a ChunkIndex {
    type Item = &'a ChunkDescriptor;
    type IntoIter = std::slice::Iter<'a, ChunkDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}

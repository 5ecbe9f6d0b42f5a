//! Seed index and longest-run matching.
//!
//! A seed is a file already on disk together with its chunk index. Targets
//! ask the seed for the longest run of its chunks that equals a prefix of the
//! chunks they still need.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tcseed_chunks::{ChunkDescriptor, ChunkId, ChunkIndex};
use tracing::debug;

use crate::error::{SeedError, SeedResult};
use crate::reflink::can_clone;
use crate::segment::Segment;

/// A seed file's chunk index plus a reverse lookup from chunk ID to every
/// position it occurs at. Read-only once built.
#[derive(Debug)]
pub struct SeedIndex {
    source: PathBuf,
    index: ChunkIndex,
    /// Positions per ID in index order; the order decides ties
    positions: HashMap<ChunkId, Vec<usize>>,
    can_reflink: bool,
}

impl SeedIndex {
    /// Build a seed for reconstructing `destination` from `source`.
    ///
    /// Probes once whether blocks can be cloned between the two files; the
    /// answer is kept for the seed's lifetime.
    pub fn new(destination: &Path, source: &Path, index: ChunkIndex) -> SeedResult<Self> {
        std::fs::metadata(source).map_err(|e| SeedError::io("reading seed metadata", source, e))?;
        let can_reflink = can_clone(destination, source);
        Ok(Self::with_reflink(source, index, can_reflink))
    }

    /// Build a seed with a capability already known to the caller.
    pub fn with_reflink(source: impl Into<PathBuf>, index: ChunkIndex, can_reflink: bool) -> Self {
        let mut positions: HashMap<ChunkId, Vec<usize>> = HashMap::new();
        for (i, c) in index.iter().enumerate() {
            positions.entry(c.id).or_default().push(i);
        }

        let source = source.into();
        debug!(
            seed = %source.display(),
            chunks = index.len(),
            unique = positions.len(),
            can_reflink,
            "seed indexed"
        );

        Self {
            source,
            index,
            positions,
            can_reflink,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source
    }

    pub fn chunks(&self) -> &[ChunkDescriptor] {
        self.index.chunks()
    }

    pub fn can_reflink(&self) -> bool {
        self.can_reflink
    }

    /// Every position `id` occurs at, in index order
    pub fn positions(&self, id: &ChunkId) -> &[usize] {
        self.positions.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Longest run of seed chunks equal to a prefix of `query`.
    ///
    /// Every position of `query[0]` in the seed is tried; on equal lengths the
    /// earliest position wins. Returns `(0, None)` when the first chunk is not
    /// in the seed.
    pub fn find_longest_match(&self, query: &[ChunkDescriptor]) -> (usize, Option<Segment<'_>>) {
        let Some(first) = query.first() else {
            return (0, None);
        };
        if self.index.is_empty() {
            return (0, None);
        }
        let Some(candidates) = self.positions.get(&first.id) else {
            return (0, None);
        };

        let mut best: Option<(usize, usize)> = None;
        for &p in candidates {
            let end = self.match_end(query, p);
            let len = end - p;
            if best.map_or(true, |(s, e)| len > e - s) {
                best = Some((p, end));
            }
        }

        match best {
            Some((start, end)) if end > start => (
                end - start,
                Some(Segment::new(self, start..end, self.can_reflink, true)),
            ),
            _ => (0, None),
        }
    }

    /// Walk `query` against the seed from position `p`; returns the seed
    /// position one past the last matching chunk.
    fn match_end(&self, query: &[ChunkDescriptor], p: usize) -> usize {
        let chunks = self.index.chunks();
        let mut dp = p;
        for q in query {
            match chunks.get(dp) {
                Some(c) if c.id == q.id => dp += 1,
                _ => break,
            }
        }
        dp
    }
}

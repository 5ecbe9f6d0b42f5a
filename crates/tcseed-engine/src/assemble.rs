//! Reconstruction driver: rebuild a target file from a seed plus a fallback
//! chunk source.
//!
//! The target index is walked left to right. Every run the seed can supply
//! becomes one `Step::Seed`; every other chunk becomes a `Step::Fetch`. Steps
//! cover disjoint destination ranges, so they run in parallel against one
//! shared destination handle using positioned writes.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use tcseed_chunks::{hash_bytes, hash_to_hex, ChunkDescriptor, ChunkIndex};
use tcseed_core::config::TcseedConfig;
use tracing::{debug, info, warn};

use crate::align::ClonePlan;
use crate::error::SeedError;
use crate::seed::SeedIndex;
use crate::segment::Segment;

/// Where chunk bytes come from when no seed can supply them.
pub trait ChunkSource: Sync {
    fn fetch(&self, chunk: &ChunkDescriptor) -> Result<Vec<u8>>;
}

/// Reads chunks from a local file that the target index describes.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: File,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening chunk source: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

impl ChunkSource for FileSource {
    fn fetch(&self, chunk: &ChunkDescriptor) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; chunk.size as usize];
        self.file.read_exact_at(&mut buf, chunk.start).with_context(|| {
            format!(
                "reading chunk at {} (+{}) from {}",
                chunk.start,
                chunk.size,
                self.path.display()
            )
        })?;
        Ok(buf)
    }
}

/// One unit of reconstruction work
#[derive(Debug, Clone, Copy)]
pub enum Step<'a> {
    /// Copy or clone a matched run from the seed
    Seed {
        segment: Segment<'a>,
        /// The target chunks the segment stands in for
        target: &'a [ChunkDescriptor],
    },
    /// Pull a single chunk from the fallback source
    Fetch { chunk: &'a ChunkDescriptor },
}

impl Step<'_> {
    /// Destination offset the step writes at
    pub fn offset(&self) -> u64 {
        match self {
            Step::Seed { target, .. } => target.first().map_or(0, |c| c.start),
            Step::Fetch { chunk } => chunk.start,
        }
    }

    /// Bytes the step writes, counted from the target index
    pub fn length(&self) -> u64 {
        match self {
            Step::Seed { target, .. } => target.iter().map(|c| c.size).sum(),
            Step::Fetch { chunk } => chunk.size,
        }
    }
}

/// Split the target into seed runs and chunks to fetch.
pub fn plan<'a>(target: &'a ChunkIndex, seed: &'a SeedIndex) -> Vec<Step<'a>> {
    let chunks = target.chunks();
    let mut steps = Vec::new();
    let mut i = 0;
    while i < chunks.len() {
        match seed.find_longest_match(&chunks[i..]) {
            (n, Some(segment)) if n > 0 => {
                steps.push(Step::Seed {
                    segment,
                    target: &chunks[i..i + n],
                });
                i += n;
            }
            _ => {
                steps.push(Step::Fetch { chunk: &chunks[i] });
                i += 1;
            }
        }
    }
    steps
}

/// Knobs for `assemble`
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Clone granularity; `None` asks the destination filesystem
    pub block_size: Option<u64>,
    /// Re-hash seed chunks before using them
    pub validate: bool,
    /// Worker threads (0 = rayon default)
    pub workers: usize,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            block_size: None,
            validate: true,
            workers: 0,
        }
    }
}

impl From<&TcseedConfig> for AssembleOptions {
    fn from(config: &TcseedConfig) -> Self {
        Self {
            block_size: config.seed.block_size_override(),
            validate: config.seed.validate,
            workers: config.assemble.workers,
        }
    }
}

/// What a reconstruction did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembleStats {
    pub seed_segments: usize,
    pub fetched_chunks: usize,
    pub bytes_cloned: u64,
    pub bytes_copied: u64,
    pub bytes_fetched: u64,
    /// Segments that had to be retried as a copy or fetched instead
    pub fallbacks: usize,
}

impl AssembleStats {
    fn merge(mut self, other: Self) -> Self {
        self.seed_segments += other.seed_segments;
        self.fetched_chunks += other.fetched_chunks;
        self.bytes_cloned += other.bytes_cloned;
        self.bytes_copied += other.bytes_copied;
        self.bytes_fetched += other.bytes_fetched;
        self.fallbacks += other.fallbacks;
        self
    }

    /// Bytes taken from the seed, cloned or copied
    pub fn bytes_from_seed(&self) -> u64 {
        self.bytes_cloned + self.bytes_copied
    }
}

/// Write the file described by `target` to `dst_path`.
///
/// Runs the seed can supply are cloned or copied from it; everything else,
/// and any seed run whose bytes no longer match its index, is fetched from
/// `source`.
pub fn assemble(
    dst_path: &Path,
    target: &ChunkIndex,
    seed: &SeedIndex,
    source: &dyn ChunkSource,
    opts: &AssembleOptions,
) -> Result<AssembleStats> {
    let dst = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst_path)
        .with_context(|| format!("creating destination: {}", dst_path.display()))?;
    let size = target.chunks().last().map_or(0, |c| c.end());
    dst.set_len(size)
        .with_context(|| format!("sizing destination: {}", dst_path.display()))?;

    let block_size = match opts.block_size {
        Some(bs) => bs,
        None => dst
            .metadata()
            .with_context(|| format!("reading metadata: {}", dst_path.display()))?
            .blksize(),
    };

    let steps = plan(target, seed);
    info!(
        dst = %dst_path.display(),
        seed = %seed.source_path().display(),
        steps = steps.len(),
        bytes = size,
        block_size,
        "assembling"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.workers)
        .build()
        .context("building assemble worker pool")?;

    let stats = pool.install(|| {
        steps
            .par_iter()
            .map(|step| run_step(step, &dst, block_size, source, opts))
            .try_reduce(AssembleStats::default, |a, b| Ok(a.merge(b)))
    })?;

    dst.sync_all()
        .with_context(|| format!("syncing destination: {}", dst_path.display()))?;

    info!(
        dst = %dst_path.display(),
        cloned = stats.bytes_cloned,
        copied = stats.bytes_copied,
        fetched = stats.bytes_fetched,
        fallbacks = stats.fallbacks,
        "assembled"
    );
    Ok(stats)
}

fn run_step(
    step: &Step<'_>,
    dst: &File,
    block_size: u64,
    source: &dyn ChunkSource,
    opts: &AssembleOptions,
) -> Result<AssembleStats> {
    let (segment, target) = match *step {
        Step::Fetch { chunk } => return fetch_chunks(std::slice::from_ref(chunk), dst, source),
        Step::Seed { segment, target } => (segment, target),
    };

    let segment = if opts.validate {
        segment
    } else {
        segment.without_validation()
    };
    let offset = step.offset();
    let length = step.length();

    match segment.write_into(dst, offset, length, block_size) {
        Ok(()) => Ok(seed_stats(&segment, offset, length, block_size)),
        Err(e) if e.is_clone_failure() => {
            debug!(
                seed = %segment.source_path().display(),
                offset,
                "clone failed, copying instead: {e}"
            );
            // Validation already passed before the clone was attempted
            segment
                .without_reflink()
                .without_validation()
                .write_into(dst, offset, length, block_size)
                .with_context(|| format!("copying seed segment to offset {offset}"))?;
            Ok(AssembleStats {
                seed_segments: 1,
                bytes_copied: length,
                fallbacks: 1,
                ..Default::default()
            })
        }
        Err(e @ SeedError::SeedMismatch { .. }) => {
            warn!("{e}; fetching {} chunks instead", target.len());
            let mut stats = fetch_chunks(target, dst, source)?;
            stats.fallbacks += 1;
            Ok(stats)
        }
        Err(e) => Err(e).with_context(|| format!("writing seed segment to offset {offset}")),
    }
}

fn seed_stats(segment: &Segment<'_>, offset: u64, length: u64, block_size: u64) -> AssembleStats {
    let (cloned, copied) = if segment.can_reflink() {
        ClonePlan::new(segment.start(), offset, length, block_size)
            .map(|p| (p.clone_len(), p.copy_len()))
            .unwrap_or((0, length))
    } else {
        (0, length)
    };
    AssembleStats {
        seed_segments: 1,
        bytes_cloned: cloned,
        bytes_copied: copied,
        ..Default::default()
    }
}

fn fetch_chunks(
    chunks: &[ChunkDescriptor],
    dst: &File,
    source: &dyn ChunkSource,
) -> Result<AssembleStats> {
    let mut stats = AssembleStats::default();
    for chunk in chunks {
        let data = source.fetch(chunk)?;
        if data.len() as u64 != chunk.size || hash_bytes(&data) != chunk.id {
            anyhow::bail!(
                "chunk {} at offset {} failed verification",
                hash_to_hex(&chunk.id),
                chunk.start
            );
        }
        dst.write_all_at(&data, chunk.start)
            .with_context(|| format!("writing chunk to offset {}", chunk.start))?;
        stats.fetched_chunks += 1;
        stats.bytes_fetched += chunk.size;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(tags: &[u8]) -> ChunkIndex {
        let chunks = tags
            .iter()
            .enumerate()
            .map(|(i, t)| ChunkDescriptor::new(hash_bytes(&[*t]), i as u64 * 10, 10))
            .collect();
        ChunkIndex::new(chunks).unwrap()
    }

    #[test]
    fn plan_alternates_seed_runs_and_fetches() {
        let seed = SeedIndex::with_reflink("/seed", index_of(b"abcdef"), false);
        let target = index_of(b"abXcdYf");
        let steps = plan(&target, &seed);

        let shape: Vec<(char, u64, u64)> = steps
            .iter()
            .map(|s| {
                let kind = match s {
                    Step::Seed { .. } => 'S',
                    Step::Fetch { .. } => 'F',
                };
                (kind, s.offset(), s.length())
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                ('S', 0, 20),
                ('F', 20, 10),
                ('S', 30, 20),
                ('F', 50, 10),
                ('S', 60, 10),
            ]
        );
    }

    #[test]
    fn plan_covers_target_exactly() {
        let seed = SeedIndex::with_reflink("/seed", index_of(b"abab"), false);
        let target = index_of(b"ababzab");
        let steps = plan(&target, &seed);

        let mut next = 0;
        for s in &steps {
            assert_eq!(s.offset(), next);
            next += s.length();
        }
        assert_eq!(next, target.total_size());
    }

    #[test]
    fn empty_target_plans_nothing() {
        let seed = SeedIndex::with_reflink("/seed", index_of(b"ab"), false);
        let target = ChunkIndex::default();
        assert!(plan(&target, &seed).is_empty());
    }

    #[test]
    fn options_follow_config() {
        let mut config = TcseedConfig::default();
        config.seed.validate = false;
        config.seed.block_size = 65536;
        config.assemble.workers = 3;

        let opts = AssembleOptions::from(&config);
        assert_eq!(opts.block_size, Some(65536));
        assert!(!opts.validate);
        assert_eq!(opts.workers, 3);
    }

    #[test]
    fn stats_merge_adds_fields() {
        let a = AssembleStats {
            seed_segments: 1,
            bytes_cloned: 4096,
            bytes_copied: 10,
            ..Default::default()
        };
        let b = AssembleStats {
            fetched_chunks: 2,
            bytes_fetched: 20,
            fallbacks: 1,
            ..Default::default()
        };
        let m = a.merge(b);
        assert_eq!(m.seed_segments, 1);
        assert_eq!(m.fetched_chunks, 2);
        assert_eq!(m.bytes_from_seed(), 4106);
        assert_eq!(m.fallbacks, 1);
    }
}

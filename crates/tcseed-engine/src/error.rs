use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type SeedResult<T> = Result<T, SeedError>;

/// Failures while reading from a seed or writing a segment.
///
/// Nothing is retried internally; the caller decides between plain copy,
/// chunk-store fallback, or aborting.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("unable to copy {expected} bytes from {}: segment is {actual} bytes", .path.display())]
    LengthMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("seed index for {} doesn't match its data at chunk {index} (offset {start})", .path.display())]
    SeedMismatch {
        path: PathBuf,
        index: usize,
        start: u64,
    },

    #[error(
        "reflink ranges not aligned: source offset {src_offset} and destination offset \
         {dst_offset} differ modulo block size {block_size}"
    )]
    AlignmentMismatch {
        src_offset: u64,
        dst_offset: u64,
        block_size: u64,
    },

    #[error("invalid clone block size {0}")]
    InvalidBlockSize(u64),

    #[error("filesystem refused to clone {length} bytes from {}: {source}", .path.display())]
    CloneUnsupported {
        path: PathBuf,
        length: u64,
        #[source]
        source: io::Error,
    },

    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SeedError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// True when retrying the same segment as a plain copy can succeed
    pub fn is_clone_failure(&self) -> bool {
        matches!(
            self,
            Self::AlignmentMismatch { .. } | Self::CloneUnsupported { .. } | Self::InvalidBlockSize(_)
        )
    }
}

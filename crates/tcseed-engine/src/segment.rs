//! Matched seed ranges and writing them into a destination file.

use std::fmt;
use std::fs::File;
use std::io;
use std::ops::Range;
use std::os::unix::fs::FileExt;
use std::path::Path;

use tcseed_chunks::{hash_bytes, ChunkDescriptor};
use tracing::{debug, trace};

use crate::align::ClonePlan;
use crate::error::{SeedError, SeedResult};
use crate::reflink::{is_clone_unsupported, BlockCloner, Reflink};
use crate::seed::SeedIndex;

/// Largest buffer used for a plain copy
const COPY_BUF_SIZE: u64 = 64 * 1024;

/// A contiguous run of a seed's chunks, borrowed from its `SeedIndex`.
///
/// Cheap to copy; cannot outlive the seed it was matched against. An empty
/// segment has size 0 and stands for "no match".
#[derive(Clone, Copy)]
pub struct Segment<'a> {
    seed: &'a SeedIndex,
    first: usize,
    end: usize,
    can_reflink: bool,
    needs_validation: bool,
}

impl<'a> Segment<'a> {
    pub(crate) fn new(
        seed: &'a SeedIndex,
        chunks: Range<usize>,
        can_reflink: bool,
        needs_validation: bool,
    ) -> Self {
        Self {
            seed,
            first: chunks.start,
            end: chunks.end,
            can_reflink,
            needs_validation,
        }
    }

    pub fn source_path(&self) -> &'a Path {
        self.seed.source_path()
    }

    pub fn chunks(&self) -> &'a [ChunkDescriptor] {
        &self.seed.chunks()[self.first..self.end]
    }

    pub fn is_empty(&self) -> bool {
        self.first == self.end
    }

    /// Byte offset of the segment within the seed file
    pub fn start(&self) -> u64 {
        self.chunks().first().map_or(0, |c| c.start)
    }

    /// Bytes from the first chunk's start to the last chunk's end
    pub fn size(&self) -> u64 {
        match (self.chunks().first(), self.chunks().last()) {
            (Some(first), Some(last)) => last.end() - first.start,
            _ => 0,
        }
    }

    pub fn can_reflink(&self) -> bool {
        self.can_reflink
    }

    pub fn needs_validation(&self) -> bool {
        self.needs_validation
    }

    /// The same range, written with plain copies only
    pub fn without_reflink(self) -> Self {
        Self {
            can_reflink: false,
            ..self
        }
    }

    /// The same range, trusting the seed's index without re-hashing
    pub fn without_validation(self) -> Self {
        Self {
            needs_validation: false,
            ..self
        }
    }

    /// Write this segment's bytes into `dst` at `dst_offset`.
    ///
    /// `expected_length` is the caller's own count of bytes this segment
    /// supplies; a disagreement fails before anything is opened or written.
    /// When cloning, `block_size` is the filesystem's clone granularity.
    pub fn write_into(
        &self,
        dst: &File,
        dst_offset: u64,
        expected_length: u64,
        block_size: u64,
    ) -> SeedResult<()> {
        self.write_into_with(&Reflink, dst, dst_offset, expected_length, block_size)
    }

    /// `write_into` with a caller-supplied clone primitive
    pub fn write_into_with(
        &self,
        cloner: &dyn BlockCloner,
        dst: &File,
        dst_offset: u64,
        expected_length: u64,
        block_size: u64,
    ) -> SeedResult<()> {
        let size = self.size();
        if expected_length != size {
            return Err(SeedError::LengthMismatch {
                path: self.source_path().to_path_buf(),
                expected: expected_length,
                actual: size,
            });
        }
        if self.is_empty() {
            return Ok(());
        }

        let path = self.source_path();
        // Closed on every return path when `src` drops
        let src = File::open(path).map_err(|e| SeedError::io("opening seed", path, e))?;

        if self.needs_validation {
            self.validate(&src)?;
        }

        let src_offset = self.start();
        debug!(
            seed = %path.display(),
            src_offset,
            dst_offset,
            length = size,
            reflink = self.can_reflink,
            "writing seed segment"
        );

        if !self.can_reflink {
            return copy_range(dst, &src, path, src_offset, size, dst_offset);
        }
        self.clone_into(cloner, dst, &src, src_offset, size, dst_offset, block_size)
    }

    /// Re-hash every chunk of the segment against the seed file's bytes.
    fn validate(&self, src: &File) -> SeedResult<()> {
        let path = self.source_path();
        let mut buf = Vec::new();
        for (i, c) in self.chunks().iter().enumerate() {
            let mismatch = || SeedError::SeedMismatch {
                path: path.to_path_buf(),
                index: self.first + i,
                start: c.start,
            };

            buf.resize(c.size as usize, 0);
            match src.read_exact_at(&mut buf, c.start) {
                Ok(()) => {}
                // The seed shrank since it was indexed
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(mismatch()),
                Err(e) => return Err(SeedError::io("reading seed", path, e)),
            }
            if hash_bytes(&buf) != c.id {
                return Err(mismatch());
            }
        }
        trace!(seed = %path.display(), chunks = self.chunks().len(), "seed segment validated");
        Ok(())
    }

    /// Clone the aligned middle of the range and copy the edges around it.
    #[allow(clippy::too_many_arguments)]
    fn clone_into(
        &self,
        cloner: &dyn BlockCloner,
        dst: &File,
        src: &File,
        src_offset: u64,
        length: u64,
        dst_offset: u64,
        block_size: u64,
    ) -> SeedResult<()> {
        let path = self.source_path();
        let plan = ClonePlan::new(src_offset, dst_offset, length, block_size)?;

        for edge in [&plan.head, &plan.tail] {
            copy_range(
                dst,
                src,
                path,
                edge.start,
                edge.end - edge.start,
                plan.dst_offset(edge.start),
            )?;
        }

        let clone_len = plan.clone_len();
        if clone_len == 0 {
            return Ok(());
        }
        cloner
            .clone_range(
                dst,
                src,
                plan.clone.start,
                clone_len,
                plan.dst_offset(plan.clone.start),
            )
            .map_err(|e| {
                if is_clone_unsupported(&e) {
                    SeedError::CloneUnsupported {
                        path: path.to_path_buf(),
                        length: clone_len,
                        source: e,
                    }
                } else {
                    SeedError::io("cloning blocks from seed", path, e)
                }
            })
    }
}

impl fmt::Debug for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("source", &self.source_path())
            .field("chunks", &(self.first..self.end))
            .field("size", &self.size())
            .field("can_reflink", &self.can_reflink)
            .field("needs_validation", &self.needs_validation)
            .finish()
    }
}

/// Positioned copy of `length` bytes; never touches either file's cursor, so
/// concurrent writers to disjoint ranges of `dst` don't interfere.
pub(crate) fn copy_range(
    dst: &File,
    src: &File,
    src_path: &Path,
    src_offset: u64,
    length: u64,
    dst_offset: u64,
) -> SeedResult<()> {
    if length == 0 {
        return Ok(());
    }

    let mut buf = vec![0u8; length.min(COPY_BUF_SIZE) as usize];
    let mut done = 0u64;
    while done < length {
        let n = (length - done).min(buf.len() as u64) as usize;
        src.read_exact_at(&mut buf[..n], src_offset + done)
            .map_err(|e| SeedError::io("reading seed", src_path, e))?;
        dst.write_all_at(&buf[..n], dst_offset + done)
            .map_err(|e| SeedError::io("writing destination from seed", src_path, e))?;
        done += n as u64;
    }
    Ok(())
}

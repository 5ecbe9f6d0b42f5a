//! Split a byte range into a block-aligned middle that can be cloned and the
//! unaligned edges that must be copied.
//!
//! Chunk boundaries are content-defined and essentially never fall on block
//! boundaries, so a matched seed range looks like
//!
//! ```text
//!   src_offset      align_start                align_end     src_offset+length
//!       |---- head ----|========== clone ==========|---- tail ----|
//! ```
//!
//! Clones preserve each byte's position within its block, so the source and
//! destination offsets must share the same phase modulo the block size.

use std::ops::Range;

use crate::error::{SeedError, SeedResult};

/// Head copy, clone, and tail copy for one range. All ranges are source
/// offsets; `dst_*` gives where each one lands in the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClonePlan {
    pub head: Range<u64>,
    pub clone: Range<u64>,
    pub tail: Range<u64>,
    /// Destination offset minus source offset, applied to every range
    dst_delta: i128,
}

impl ClonePlan {
    pub fn new(src_offset: u64, dst_offset: u64, length: u64, block_size: u64) -> SeedResult<Self> {
        if block_size == 0 {
            return Err(SeedError::InvalidBlockSize(block_size));
        }
        if src_offset % block_size != dst_offset % block_size {
            return Err(SeedError::AlignmentMismatch {
                src_offset,
                dst_offset,
                block_size,
            });
        }

        let end = src_offset + length;
        // The first block boundary strictly after the start, and the last
        // boundary at or before the end.
        let align_start = (src_offset / block_size + 1) * block_size;
        let align_end = end / block_size * block_size;

        let (head, clone, tail) = if align_end > align_start {
            (
                src_offset..align_start,
                align_start..align_end,
                align_end..end,
            )
        } else {
            // Narrower than a full aligned block: copy everything
            (src_offset..end, end..end, end..end)
        };

        Ok(Self {
            head,
            clone,
            tail,
            dst_delta: i128::from(dst_offset) - i128::from(src_offset),
        })
    }

    /// Bytes shared by the clone call
    pub fn clone_len(&self) -> u64 {
        self.clone.end - self.clone.start
    }

    /// Bytes moved by the two edge copies
    pub fn copy_len(&self) -> u64 {
        (self.head.end - self.head.start) + (self.tail.end - self.tail.start)
    }

    /// Where a source offset from this plan lands in the destination
    pub fn dst_offset(&self, src: u64) -> u64 {
        (i128::from(src) + self.dst_delta) as u64
    }
}

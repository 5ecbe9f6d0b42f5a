//! tcseed-engine: reuse bytes from seed files when reconstructing a target
//!
//! # Overview
//! - `seed`: `SeedIndex`, the reverse chunk lookup and longest-run matcher
//! - `segment`: a matched seed range and how it is written (copy or clone)
//! - `align`: splitting a range into block-aligned clone and copied edges
//! - `reflink`: the clone capability probe and `FICLONERANGE` primitive
//! - `assemble`: the driver that plans and writes a whole target file
//!
//! All file I/O is positioned (`pread`/`pwrite`), so independent segments can
//! be written concurrently into one destination handle.

pub mod align;
pub mod assemble;
pub mod error;
pub mod reflink;
pub mod seed;
pub mod segment;

pub use align::ClonePlan;
pub use assemble::{assemble, plan, AssembleOptions, AssembleStats, ChunkSource, FileSource, Step};
pub use error::{SeedError, SeedResult};
pub use reflink::{can_clone, is_clone_unsupported, BlockCloner, Reflink};
pub use seed::SeedIndex;
pub use segment::Segment;

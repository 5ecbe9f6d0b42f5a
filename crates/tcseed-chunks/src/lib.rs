//! tcseed-chunks: chunk indexes and the content identity they are keyed by
//!
//! # Overview
//! - `blake3`: chunk IDs (BLAKE3 digests of chunk bytes)
//! - `index`: `ChunkDescriptor` / `ChunkIndex`, the ordered contiguous layout of a file
//! - `fastcdc`: content-defined chunking that produces indexes for files and buffers

pub mod blake3;
pub mod fastcdc;
pub mod index;

// Convenience re-exports for the most common operations
pub use self::blake3::{hash_bytes, hash_file_streaming, hash_to_hex, ChunkId, Hash};
pub use self::fastcdc::{chunk_data, index_bytes, index_file, ChunkSizes};
pub use self::index::{ChunkDescriptor, ChunkIndex};

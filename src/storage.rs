//! Disk storage for chunked files.
//!
//! A download is written by a [`ChunkWriter`]: the target file is extended to
//! its final size up front (sparse where the filesystem allows it) and chunks
//! are written at `index * chunk_size` in whatever order they arrive, by a
//! fixed pool of worker tasks. [`read_chunk`] serves chunks back out of a
//! complete or partially written file.
//!
//! # Examples
//!
//! ```no_run
//! use chunkswarm::storage::{read_chunk, ChunkWriter};
//! use bytes::Bytes;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let writer = ChunkWriter::create(
//!     "./downloads/data.bin",
//!     20_000,
//!     Arc::new(|index| println!("chunk {} on disk", index)),
//! )
//! .await?;
//!
//! writer.enqueue(1, Bytes::from(vec![0u8; 4_000])).await?;
//! writer.enqueue(0, Bytes::from(vec![0u8; 16_000])).await?;
//! writer.stop().await?;
//!
//! let chunk = read_chunk(Path::new("./downloads/data.bin"), 20_000, 1).await?;
//! assert_eq!(chunk.len(), 4_000);
//! # Ok(())
//! # }
//! ```

mod error;
mod reader;
mod writer;

pub use error::StorageError;
pub use reader::read_chunk;
pub use writer::{ChunkWriter, WriteCallback, WriterHandle};

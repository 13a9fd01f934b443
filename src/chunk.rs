//! Chunk geometry and content digests.
//!
//! A file of `size` bytes is cut into fixed-size chunks whose size is chosen
//! so the chunk count never exceeds [`MAX_CHUNKS_PER_FILE`]; the last chunk
//! may be short. Every chunk and every whole file is identified by its SHA-1
//! digest.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::constants::{CHUNK_BLOCK_SIZE, HASH_LEN, MAX_CHUNKS_PER_FILE};

/// A 20-byte SHA-1 digest of a chunk or a whole file.
pub type ChunkHash = [u8; HASH_LEN];

/// Returns the chunk size for a file of `file_size` bytes.
///
/// `ceil(file_size / (2^16 * 16000)) * 16000`, so small files use 16000-byte
/// chunks and larger files grow the chunk in 16000-byte steps.
pub fn chunk_size(file_size: u64) -> u64 {
    file_size.div_ceil(MAX_CHUNKS_PER_FILE * CHUNK_BLOCK_SIZE) * CHUNK_BLOCK_SIZE
}

/// Returns the number of chunks a file of `file_size` bytes is split into.
pub fn chunk_count(file_size: u64) -> usize {
    let size = chunk_size(file_size);
    if size == 0 {
        return 0;
    }
    file_size.div_ceil(size) as usize
}

/// Returns the length of chunk `index`, accounting for a short final chunk.
pub fn chunk_len(file_size: u64, index: usize) -> u64 {
    let size = chunk_size(file_size);
    let offset = index as u64 * size;
    if offset >= file_size {
        return 0;
    }
    size.min(file_size - offset)
}

pub fn hash_chunk(data: &[u8]) -> ChunkHash {
    Sha1::digest(data).into()
}

/// Size and digests of a local file, as announced in a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub size: u64,
    pub file_hash: ChunkHash,
    pub chunk_hashes: Vec<ChunkHash>,
}

impl FileDigest {
    /// Hashes the whole file and each of its chunks in one streaming pass.
    ///
    /// This is blocking I/O; async callers should run it on a blocking task.
    pub fn compute(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        let chunk = chunk_size(size) as usize;

        let mut whole = Sha1::new();
        let mut chunk_hashes = Vec::with_capacity(chunk_count(size));
        let mut buf = vec![0u8; chunk.max(1)];

        loop {
            let filled = read_full(&mut file, &mut buf)?;
            if filled == 0 {
                break;
            }
            whole.update(&buf[..filled]);
            chunk_hashes.push(hash_chunk(&buf[..filled]));
            if filled < buf.len() {
                break;
            }
        }

        Ok(Self {
            size,
            file_hash: whole.finalize().into(),
            chunk_hashes,
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_hashes.len()
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

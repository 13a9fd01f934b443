use super::error::StorageError;
use crate::chunk::{chunk_count, chunk_len, chunk_size};
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Reads chunk `index` of the file at `path`, whose full size is `file_size`.
///
/// The final chunk is returned short when the file size is not a multiple of
/// the chunk size.
pub async fn read_chunk(path: &Path, file_size: u64, index: u16) -> Result<Bytes, StorageError> {
    if usize::from(index) >= chunk_count(file_size) {
        return Err(StorageError::InvalidChunkIndex(index));
    }

    let offset = u64::from(index) * chunk_size(file_size);
    let len = chunk_len(file_size, usize::from(index));

    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

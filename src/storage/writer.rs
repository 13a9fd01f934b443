use super::error::StorageError;
use crate::chunk::{chunk_count, chunk_len, chunk_size};
use crate::constants::{WRITER_POOL_SIZE, WRITER_QUEUE_CAPACITY};
use bytes::Bytes;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Called with the chunk index once that chunk is on disk.
pub type WriteCallback = Arc<dyn Fn(u16) + Send + Sync>;

struct ChunkWrite {
    index: u16,
    data: Bytes,
}

/// Geometry shared by the writer and its handles.
#[derive(Debug, Clone)]
struct Layout {
    path: PathBuf,
    file_size: u64,
    chunk_size: u64,
    chunk_count: usize,
}

impl Layout {
    fn check(&self, index: u16, data: &Bytes) -> Result<(), StorageError> {
        if usize::from(index) >= self.chunk_count {
            return Err(StorageError::InvalidChunkIndex(index));
        }
        let expected = chunk_len(self.file_size, usize::from(index));
        if data.len() as u64 != expected {
            return Err(StorageError::ChunkLength {
                index,
                expected,
                actual: data.len(),
            });
        }
        Ok(())
    }
}

/// Writes chunks of one file, in any order, through a fixed pool of workers.
///
/// The target file is extended to its final size on creation, so every chunk
/// lands with a positioned write at `index * chunk_size` and the file never
/// grows afterwards. Writes complete asynchronously; each success invokes the
/// caller's [`WriteCallback`].
///
/// [`ChunkWriter::stop`] drains every queued write before the file is synced
/// and closed.
pub struct ChunkWriter {
    layout: Layout,
    queue: Option<mpsc::Sender<ChunkWrite>>,
    workers: Vec<JoinHandle<()>>,
    file: Arc<File>,
}

impl ChunkWriter {
    /// Creates (or reopens) the file at `path` sized to `file_size` and
    /// starts the worker pool.
    pub async fn create(
        path: impl AsRef<Path>,
        file_size: u64,
        on_written: WriteCallback,
    ) -> Result<Self, StorageError> {
        Self::with_pool_size(path, file_size, on_written, WRITER_POOL_SIZE).await
    }

    pub async fn with_pool_size(
        path: impl AsRef<Path>,
        file_size: u64,
        on_written: WriteCallback,
        pool_size: usize,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        file.set_len(file_size).await?;
        let file = Arc::new(file.into_std().await);

        let layout = Layout {
            path,
            file_size,
            chunk_size: chunk_size(file_size),
            chunk_count: chunk_count(file_size),
        };

        let (tx, rx) = mpsc::channel(WRITER_QUEUE_CAPACITY);
        let rx = Arc::new(TokioMutex::new(rx));

        let workers = (0..pool_size.max(1))
            .map(|_| {
                tokio::spawn(run_worker(
                    rx.clone(),
                    file.clone(),
                    layout.clone(),
                    on_written.clone(),
                ))
            })
            .collect();

        debug!(
            "Chunk writer for {} started: {} bytes in {} chunks",
            layout.path.display(),
            layout.file_size,
            layout.chunk_count
        );

        Ok(Self {
            layout,
            queue: Some(tx),
            workers,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.layout.path
    }

    pub fn chunk_size(&self) -> u64 {
        self.layout.chunk_size
    }

    /// Returns a cloneable handle for enqueueing from other tasks.
    pub fn handle(&self) -> Option<WriterHandle> {
        self.queue.as_ref().map(|tx| WriterHandle {
            tx: tx.clone(),
            layout: self.layout.clone(),
        })
    }

    /// Queues a chunk for writing.
    ///
    /// Waits only when the queue is full.
    pub async fn enqueue(&self, index: u16, data: Bytes) -> Result<(), StorageError> {
        match self.handle() {
            Some(handle) => handle.enqueue(index, data).await,
            None => Err(StorageError::WriterStopped(
                self.layout.path.display().to_string(),
            )),
        }
    }

    /// Drains every queued write, syncs, and closes the file.
    ///
    /// Handles obtained from [`ChunkWriter::handle`] keep the queue open until
    /// they are dropped, so any write they have in flight is drained as well.
    pub async fn stop(mut self) -> Result<(), StorageError> {
        self.queue.take();

        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!("Chunk writer worker for {} panicked: {}", self.layout.path.display(), e);
            }
        }

        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.sync_data())
            .await
            .map_err(std::io::Error::other)??;

        debug!("Chunk writer for {} stopped", self.layout.path.display());
        Ok(())
    }
}

/// A cloneable sender into a [`ChunkWriter`]'s queue.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<ChunkWrite>,
    layout: Layout,
}

impl WriterHandle {
    pub async fn enqueue(&self, index: u16, data: Bytes) -> Result<(), StorageError> {
        self.layout.check(index, &data)?;
        self.tx
            .send(ChunkWrite { index, data })
            .await
            .map_err(|_| StorageError::WriterStopped(self.layout.path.display().to_string()))
    }
}

async fn run_worker(
    rx: Arc<TokioMutex<mpsc::Receiver<ChunkWrite>>>,
    file: Arc<File>,
    layout: Layout,
    on_written: WriteCallback,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };

        let offset = u64::from(job.index) * layout.chunk_size;
        let target = file.clone();
        let data = job.data;
        let result = tokio::task::spawn_blocking(move || write_at(&target, offset, &data))
            .await
            .map_err(std::io::Error::other)
            .and_then(|r| r);

        match result {
            Ok(()) => {
                trace!("Chunk {} written to {}", job.index, layout.path.display());
                on_written(job.index);
            }
            Err(e) => {
                error!(
                    "Failed to write chunk {} to {}: {}",
                    job.index,
                    layout.path.display(),
                    e
                );
            }
        }
    }
}

#[cfg(unix)]
fn write_at(file: &File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_at(file: &File, mut offset: u64, mut data: &[u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !data.is_empty() {
        let n = file.seek_write(data, offset)?;
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        data = &data[n..];
        offset += n as u64;
    }
    Ok(())
}

use super::library::LocalFile;
use crate::bitfield::Bitfield;
use crate::chunk::{chunk_count, hash_chunk, ChunkHash};
use crate::protocol::FileAnswer;
use crate::stats::PeerStatistics;
use crate::storage::{ChunkWriter, WriterHandle};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Request bookkeeping for one chunk at one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestState {
    /// When the chunk was last requested from this peer, if ever.
    pub last_requested_at: Option<Instant>,
    /// Requests sent to this peer for this chunk.
    pub tries: u32,
}

/// What one peer of a download is believed to hold, and how it has behaved.
///
/// The chunk map mirrors the peer's last bitfield reported by the tracker.
#[derive(Debug, Clone, Default)]
pub struct PeerDownloadState {
    pub(crate) chunks: BTreeMap<usize, RequestState>,
    pub(crate) consecutive_timeouts: u32,
}

impl PeerDownloadState {
    pub fn holds(&self, index: usize) -> bool {
        self.chunks.contains_key(&index)
    }

    pub fn request_state(&self, index: usize) -> Option<&RequestState> {
        self.chunks.get(&index)
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Replaces the held chunk set, keeping request history for chunks that
    /// are still held.
    fn update_chunks(&mut self, bitfield: &Bitfield) {
        self.chunks.retain(|index, _| bitfield.has(*index));
        for index in bitfield.indices() {
            self.chunks.entry(index).or_default();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub index: usize,
    pub hash: ChunkHash,
    /// Received with a matching digest. Never reverts.
    pub downloaded: bool,
    /// Written to disk by the chunk writer.
    pub persisted: bool,
}

/// Result of handing an arriving chunk to its download.
#[derive(Debug)]
pub enum ChunkVerdict {
    /// The chunk was accepted; enqueue it on the handle, if any.
    Accepted(Option<WriterHandle>),
    /// Already downloaded; dropped.
    Duplicate,
    /// Digest mismatch; dropped.
    Corrupt,
    /// No active download for this file or index.
    Unknown,
}

/// A file being fetched once the tracker has supplied its metadata.
pub struct ForDownloadFile {
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    pub(crate) size: u64,
    pub(crate) file_hash: ChunkHash,
    pub(crate) chunks: Vec<ChunkInfo>,
    pub(crate) downloaded: usize,
    pub(crate) peers: BTreeMap<SocketAddr, PeerDownloadState>,
    /// Evicted peers with the chunk set they held when evicted.
    pub(crate) evicted: HashMap<SocketAddr, Bitfield>,
    pub(crate) writer: Option<ChunkWriter>,
    pub(crate) started_at: Instant,
    pub(crate) last_refresh: Instant,
}

impl ForDownloadFile {
    /// Builds the download state from a tracker answer. Peers are added
    /// separately with [`apply_peers`](Self::apply_peers).
    pub fn new(answer: &FileAnswer, path: PathBuf, now: Instant) -> Self {
        let chunks = answer
            .chunk_hashes
            .iter()
            .enumerate()
            .map(|(index, hash)| ChunkInfo {
                index,
                hash: *hash,
                downloaded: false,
                persisted: false,
            })
            .collect();

        Self {
            name: answer.name.clone(),
            path,
            size: answer.size,
            file_hash: answer.file_hash,
            chunks,
            downloaded: 0,
            peers: BTreeMap::new(),
            evicted: HashMap::new(),
            writer: None,
            started_at: now,
            last_refresh: now,
        }
    }

    pub fn with_writer(mut self, writer: ChunkWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn downloaded_count(&self) -> usize {
        self.downloaded
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded == self.chunks.len()
    }

    pub fn chunk(&self, index: usize) -> Option<&ChunkInfo> {
        self.chunks.get(index)
    }

    pub fn peer(&self, addr: &SocketAddr) -> Option<&PeerDownloadState> {
        self.peers.get(addr)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_evicted(&self, addr: &SocketAddr) -> bool {
        self.evicted.contains_key(addr)
    }

    /// Chunks written to disk so far, which are the chunks this node can
    /// serve.
    pub fn bitfield(&self) -> Bitfield {
        Bitfield::from_indices(
            self.chunks.iter().filter(|c| c.persisted).map(|c| c.index),
            self.chunks.len(),
        )
    }

    /// Merges a fresh peer list from the tracker.
    ///
    /// Each listed peer's chunk set is replaced by its reported bitfield.
    /// Peers missing from the list are kept. An evicted peer stays out until
    /// it reports a chunk set different from the one it held when evicted;
    /// it then rejoins with a clean record.
    pub fn apply_peers(&mut self, peers: &[(SocketAddr, Bytes)]) {
        let count = self.chunks.len();
        for (addr, bits) in peers {
            let bitfield = Bitfield::from_bytes(bits, count);
            if let Some(held) = self.evicted.get(addr) {
                if *held == bitfield {
                    trace!("Skipping evicted peer {} for {}", addr, self.name);
                    continue;
                }
                debug!("Evicted peer {} rejoins {} with new chunks", addr, self.name);
                self.evicted.remove(addr);
            }
            self.peers.entry(*addr).or_default().update_chunks(&bitfield);
        }
    }

    /// Verifies and records an arriving chunk.
    pub fn on_chunk(
        &mut self,
        index: u16,
        data: &[u8],
        from: SocketAddr,
        now: Instant,
        stats: &PeerStatistics,
    ) -> ChunkVerdict {
        let index = usize::from(index);
        let Some(chunk) = self.chunks.get_mut(index) else {
            debug!("Chunk {} out of range for {} from {}", index, self.name, from);
            return ChunkVerdict::Unknown;
        };

        if chunk.downloaded {
            trace!("Duplicate chunk {} of {} from {}", index, self.name, from);
            return ChunkVerdict::Duplicate;
        }

        if hash_chunk(data) != chunk.hash {
            warn!("Corrupt chunk {} of {} from {}", index, self.name, from);
            return ChunkVerdict::Corrupt;
        }

        chunk.downloaded = true;
        self.downloaded += 1;

        if let Some(peer) = self.peers.get_mut(&from) {
            peer.consecutive_timeouts = 0;
            let requested_at = peer.chunks.get(&index).and_then(|s| s.last_requested_at);
            if let Some(requested_at) = requested_at {
                stats.record_download(from, data.len() as u64, requested_at, now);
            }
        }

        ChunkVerdict::Accepted(self.writer.as_ref().and_then(ChunkWriter::handle))
    }

    pub fn mark_persisted(&mut self, index: u16) {
        if let Some(chunk) = self.chunks.get_mut(usize::from(index)) {
            chunk.persisted = true;
        }
    }

    pub(crate) fn evict(&mut self, addr: SocketAddr) {
        let held = match self.peers.remove(&addr) {
            Some(peer) => {
                warn!(
                    "Evicting peer {} from {} after {} timeouts",
                    addr, self.name, peer.consecutive_timeouts
                );
                Bitfield::from_indices(peer.chunks.keys().copied(), self.chunks.len())
            }
            None => Bitfield::new(self.chunks.len()),
        };
        self.evicted.insert(addr, held);
    }

    pub(crate) fn into_completed(self, now: Instant) -> CompletedDownload {
        CompletedDownload {
            file: LocalFile {
                name: self.name,
                path: self.path,
                size: self.size,
                file_hash: self.file_hash,
                chunk_hashes: self.chunks.iter().map(|c| c.hash).collect(),
            },
            elapsed: now.saturating_duration_since(self.started_at),
            writer: self.writer,
        }
    }
}

/// A download that has every chunk. The writer still has to be stopped.
pub struct CompletedDownload {
    pub file: LocalFile,
    pub elapsed: Duration,
    pub writer: Option<ChunkWriter>,
}

/// One entry of the active download set.
pub enum Download {
    /// Requested from the tracker, no answer yet.
    AwaitingMetadata { requested_at: Instant },
    Downloading(Box<ForDownloadFile>),
}

impl Download {
    pub fn into_writer(self) -> Option<ChunkWriter> {
        match self {
            Download::AwaitingMetadata { .. } => None,
            Download::Downloading(file) => file.writer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    AwaitingMetadata,
    Downloading,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadStatus {
    pub name: String,
    pub phase: DownloadPhase,
    pub downloaded: usize,
    pub total: usize,
    pub peers: usize,
}

/// Every file this node is currently fetching, keyed by name.
#[derive(Default)]
pub struct Downloads {
    pub(crate) files: HashMap<String, Download>,
}

impl Downloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Registers a user request. Returns `false` if the file is already
    /// being fetched.
    pub fn request(&mut self, name: &str, now: Instant) -> bool {
        if self.files.contains_key(name) {
            return false;
        }
        self.files
            .insert(name.to_string(), Download::AwaitingMetadata { requested_at: now });
        true
    }

    pub fn is_awaiting(&self, name: &str) -> bool {
        matches!(self.files.get(name), Some(Download::AwaitingMetadata { .. }))
    }

    /// Moves a file from awaiting metadata to downloading.
    ///
    /// Hands the file back if its request is gone or already started.
    pub fn start(&mut self, file: ForDownloadFile) -> Result<(), Box<ForDownloadFile>> {
        let file = Box::new(file);
        match self.files.get_mut(&file.name) {
            Some(entry) if matches!(entry, Download::AwaitingMetadata { .. }) => {
                debug!(
                    "Downloading {}: {} bytes in {} chunks",
                    file.name,
                    file.size,
                    file.chunk_count()
                );
                *entry = Download::Downloading(file);
                Ok(())
            }
            _ => Err(file),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ForDownloadFile> {
        match self.files.get(name) {
            Some(Download::Downloading(file)) => Some(file.as_ref()),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ForDownloadFile> {
        match self.files.get_mut(name) {
            Some(Download::Downloading(file)) => Some(file.as_mut()),
            _ => None,
        }
    }

    /// Applies a refreshed peer list. Returns `false` if the file is not
    /// downloading.
    pub fn apply_peers(&mut self, name: &str, peers: &[(SocketAddr, Bytes)]) -> bool {
        match self.get_mut(name) {
            Some(file) => {
                file.apply_peers(peers);
                true
            }
            None => false,
        }
    }

    /// Drops a download in either phase.
    pub fn discard(&mut self, name: &str) -> Option<Download> {
        self.files.remove(name)
    }

    pub fn on_chunk(
        &mut self,
        name: &str,
        index: u16,
        data: &[u8],
        from: SocketAddr,
        now: Instant,
        stats: &PeerStatistics,
    ) -> ChunkVerdict {
        match self.get_mut(name) {
            Some(file) => file.on_chunk(index, data, from, now, stats),
            None => {
                debug!("Chunk {} of {} from {} has no download", index, name, from);
                ChunkVerdict::Unknown
            }
        }
    }

    pub fn mark_persisted(&mut self, name: &str, index: u16) {
        if let Some(file) = self.get_mut(name) {
            file.mark_persisted(index);
        }
    }

    /// Path and size of an in-progress file, if chunk `index` is on disk.
    pub fn persisted_source(&self, name: &str, index: u16) -> Option<(PathBuf, u64)> {
        let file = self.get(name)?;
        let chunk = file.chunk(usize::from(index))?;
        chunk.persisted.then(|| (file.path.clone(), file.size))
    }

    pub fn status(&self) -> Vec<DownloadStatus> {
        let mut status: Vec<DownloadStatus> = self
            .files
            .iter()
            .map(|(name, download)| match download {
                Download::AwaitingMetadata { .. } => DownloadStatus {
                    name: name.clone(),
                    phase: DownloadPhase::AwaitingMetadata,
                    downloaded: 0,
                    total: 0,
                    peers: 0,
                },
                Download::Downloading(file) => DownloadStatus {
                    name: name.clone(),
                    phase: DownloadPhase::Downloading,
                    downloaded: file.downloaded,
                    total: file.chunk_count(),
                    peers: file.peer_count(),
                },
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    /// Removes every download, returning the writers still to be stopped.
    pub fn drain(&mut self) -> Vec<ChunkWriter> {
        self.files
            .drain()
            .filter_map(|(_, download)| download.into_writer())
            .collect()
    }
}

/// Checks that an answer describes a file this node can download.
pub(crate) fn answer_is_consistent(answer: &FileAnswer) -> bool {
    answer.size > 0 && answer.chunk_hashes.len() == chunk_count(answer.size)
}

use super::download::{answer_is_consistent, ChunkVerdict, DownloadStatus, Downloads, ForDownloadFile};
use super::error::NodeError;
use super::library::{Library, LocalFile};
use crate::bitfield::Bitfield;
use crate::chunk::{chunk_size, FileDigest};
use crate::config::NodeConfig;
use crate::constants::{
    CHUNK_DATAGRAM_OVERHEAD, MAX_DATAGRAM_SIZE, OUTBOUND_QUEUE_CAPACITY, TICK_INTERVAL,
};
use crate::protocol::{
    self, Datagram, FileAnswer, FileSuccessKind, FrameReader, FrameWriter, Message, PeerEntry,
    ProtocolError,
};
use crate::stats::{PeerStatistics, StatsSnapshot};
use crate::storage::{read_chunk, ChunkWriter, WriteCallback};
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream, ToSocketAddrs, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Builder for a node.
///
/// # Examples
///
/// ```no_run
/// use chunkswarm::{Node, NodeConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let node = Node::new(NodeConfig::default())
///     .start("127.0.0.1:9090")
///     .await?;
///
/// node.publish("./shared").await?;
/// node.request("movie.mkv").await?;
///
/// for download in node.status().downloading {
///     println!("{}: {}/{}", download.name, download.downloaded, download.total);
/// }
///
/// node.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Node {
    config: NodeConfig,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Connects to the tracker, binds the chunk socket, registers, and
    /// starts the background tasks.
    pub async fn start(self, tracker: impl ToSocketAddrs) -> Result<NodeHandle, NodeError> {
        let stream = TcpStream::connect(tracker).await?;
        let tracker_addr = stream.peer_addr()?;
        let local_ip = stream.local_addr()?.ip();

        let unspecified: IpAddr = match local_ip {
            IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        let socket = UdpSocket::bind(SocketAddr::new(unspecified, self.config.port)).await?;
        let udp_port = socket.local_addr()?.port();

        let identity = self
            .config
            .identity
            .clone()
            .unwrap_or_else(|| local_ip.to_string());

        let (reader, mut writer) = protocol::split(stream);
        writer
            .send(&Message::Init {
                identity: identity.clone(),
                port: udp_port,
            })
            .await?;
        info!(
            "Connected to tracker {} as {}:{}",
            tracker_addr, identity, udp_port
        );

        let (tracker_tx, tracker_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            identity,
            udp_port,
            download_dir: self.config.download_dir,
            socket,
            tracker: tracker_tx,
            library: Mutex::new(Library::default()),
            downloads: Arc::new(Mutex::new(Downloads::new())),
            stats: PeerStatistics::new(),
        });

        let mut tasks = JoinSet::new();
        tasks.spawn(run_tracker_writer(writer, tracker_rx, shutdown_rx.clone()));
        tasks.spawn(run_tracker_reader(shared.clone(), reader, shutdown_rx.clone()));
        tasks.spawn(run_datagrams(shared.clone(), shutdown_rx.clone()));
        tasks.spawn(run_ticker(shared.clone(), shutdown_rx));

        Ok(NodeHandle {
            shared,
            control: Arc::new(Control {
                shutdown: shutdown_tx,
                tasks: Mutex::new(Some(tasks)),
            }),
        })
    }
}

/// What a node holds and is fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub identity: String,
    pub port: u16,
    /// Published locally, awaiting the tracker's answer.
    pub pending: Vec<String>,
    pub published: Vec<String>,
    pub downloading: Vec<DownloadStatus>,
}

struct Shared {
    identity: String,
    udp_port: u16,
    download_dir: PathBuf,
    socket: UdpSocket,
    tracker: mpsc::Sender<Message>,
    library: Mutex<Library>,
    downloads: Arc<Mutex<Downloads>>,
    stats: PeerStatistics,
}

struct Control {
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Option<JoinSet<()>>>,
}

/// A running node. Cheap to clone.
#[derive(Clone)]
pub struct NodeHandle {
    shared: Arc<Shared>,
    control: Arc<Control>,
}

impl NodeHandle {
    pub fn identity(&self) -> &str {
        &self.shared.identity
    }

    /// UDP port chunks are served on.
    pub fn port(&self) -> u16 {
        self.shared.udp_port
    }

    pub fn download_dir(&self) -> &Path {
        &self.shared.download_dir
    }

    /// Publishes a file, or every regular file under a directory.
    ///
    /// Returns the names sent to the tracker. Files in a directory that
    /// cannot be published are logged and skipped.
    pub async fn publish(&self, path: impl AsRef<Path>) -> Result<Vec<String>, NodeError> {
        let path = path.as_ref();
        if !tokio::fs::metadata(path).await?.is_dir() {
            return Ok(vec![self.publish_file(path.to_path_buf()).await?]);
        }

        let mut names = Vec::new();
        for file in collect_files(path).await? {
            match self.publish_file(file.clone()).await {
                Ok(name) => names.push(name),
                Err(e) => warn!("Skipping {}: {}", file.display(), e),
            }
        }
        Ok(names)
    }

    async fn publish_file(&self, path: PathBuf) -> Result<String, NodeError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| NodeError::InvalidName(path.display().to_string()))?;
        if self.shared.is_tracked(&name) {
            return Err(NodeError::AlreadyTracked(name));
        }

        let digest = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || FileDigest::compute(&path))
                .await
                .map_err(std::io::Error::other)??
        };
        if digest.size == 0 {
            return Err(NodeError::EmptyFile(path));
        }
        let chunk = chunk_size(digest.size);
        if chunk as usize + CHUNK_DATAGRAM_OVERHEAD + name.len() > MAX_DATAGRAM_SIZE {
            return Err(NodeError::ChunkTooLarge {
                name,
                chunk_size: chunk,
            });
        }

        let message = Message::PublishFile {
            name: name.clone(),
            size: digest.size,
            file_hash: digest.file_hash,
            chunk_hashes: digest.chunk_hashes.clone(),
        };

        {
            let mut library = self.shared.library.lock();
            if library.contains(&name) {
                return Err(NodeError::AlreadyTracked(name));
            }
            library.add_pending(LocalFile::new(name.clone(), path, digest));
        }

        if self.shared.tracker.send(message).await.is_err() {
            self.shared.library.lock().reject(&name);
            return Err(NodeError::NotConnected);
        }
        debug!("Publish of {} sent", name);
        Ok(name)
    }

    /// Starts fetching `name` from the swarm.
    pub async fn request(&self, name: &str) -> Result<(), NodeError> {
        if self.shared.library.lock().contains(name) {
            return Err(NodeError::AlreadyTracked(name.to_string()));
        }
        if !self.shared.downloads.lock().request(name, Instant::now()) {
            return Err(NodeError::AlreadyTracked(name.to_string()));
        }

        let message = Message::RequestFile {
            name: name.to_string(),
        };
        if self.shared.tracker.send(message).await.is_err() {
            self.shared.downloads.lock().discard(name);
            return Err(NodeError::NotConnected);
        }
        info!("Requested {}", name);
        Ok(())
    }

    /// Stops offering `name` and asks the tracker to forget it.
    pub async fn remove(&self, name: &str) -> Result<(), NodeError> {
        if self.shared.library.lock().unpublish(name).is_none() {
            return Err(NodeError::UnknownFile(name.to_string()));
        }
        let message = Message::RemoveFile {
            name: name.to_string(),
        };
        self.shared
            .tracker
            .send(message)
            .await
            .map_err(|_| NodeError::NotConnected)
    }

    pub fn status(&self) -> NodeStatus {
        let (pending, published) = {
            let library = self.shared.library.lock();
            (library.pending_names(), library.published_names())
        };
        NodeStatus {
            identity: self.shared.identity.clone(),
            port: self.shared.udp_port,
            pending,
            published,
            downloading: self.shared.downloads.lock().status(),
        }
    }

    pub fn statistics(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Stops every task and drains the writers of unfinished downloads.
    pub async fn shutdown(&self) {
        let _ = self.control.shutdown.send(true);

        let tasks = self.control.tasks.lock().take();
        if let Some(mut tasks) = tasks {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!("Node task failed: {}", e);
                }
            }
        }

        let writers = self.shared.downloads.lock().drain();
        for writer in writers {
            let path = writer.path().to_path_buf();
            if let Err(e) = writer.stop().await {
                error!("Failed to close {}: {}", path.display(), e);
            }
        }
        info!("Node {}:{} stopped", self.shared.identity, self.shared.udp_port);
    }
}

impl Shared {
    fn is_tracked(&self, name: &str) -> bool {
        self.library.lock().contains(name) || self.downloads.lock().contains(name)
    }

    async fn handle_tracker_message(&self, message: Message) {
        match message {
            Message::FileSuccess {
                name,
                kind: FileSuccessKind::Publish,
            } => {
                if self.library.lock().confirm(&name) {
                    info!("Published {}", name);
                } else {
                    debug!("Publish confirmation for unknown {}", name);
                }
            }
            Message::FileSuccess {
                name,
                kind: FileSuccessKind::Remove,
            } => {
                info!("Removed {} from the swarm", name);
            }
            Message::AlreadyExists { name } => {
                if self.library.lock().reject(&name).is_some() {
                    info!("{} is already published by another node", name);
                }
            }
            Message::NotFound { name } => {
                if self.library.lock().reject(&name).is_some() {
                    warn!("Tracker refused to publish {}", name);
                }
                let discarded = self.downloads.lock().discard(&name);
                if let Some(download) = discarded {
                    info!("{} was not found in the swarm", name);
                    if let Some(writer) = download.into_writer() {
                        if let Err(e) = writer.stop().await {
                            error!("Failed to close download of {}: {}", name, e);
                        }
                    }
                }
            }
            Message::AnswerNodes(answer) => self.handle_answer(answer).await,
            other => warn!("Unexpected {:?} from tracker", other.id()),
        }
    }

    async fn handle_answer(&self, answer: FileAnswer) {
        let peers = self.resolve_peers(&answer.peers).await;

        let awaiting = self.downloads.lock().is_awaiting(&answer.name);
        if !awaiting {
            if self.downloads.lock().apply_peers(&answer.name, &peers) {
                debug!("Refreshed {} peers for {}", peers.len(), answer.name);
            }
            return;
        }

        if !answer_is_consistent(&answer) {
            warn!("Tracker metadata for {} is inconsistent", answer.name);
            self.downloads.lock().discard(&answer.name);
            return;
        }
        let Some(path) = self.download_path(&answer.name) else {
            warn!("Refusing to download {:?}: not a plain file name", answer.name);
            self.downloads.lock().discard(&answer.name);
            return;
        };

        let callback = persist_callback(Arc::downgrade(&self.downloads), answer.name.clone());
        let writer = match ChunkWriter::create(&path, answer.size, callback).await {
            Ok(writer) => writer,
            Err(e) => {
                error!("Cannot create {}: {}", path.display(), e);
                self.downloads.lock().discard(&answer.name);
                return;
            }
        };

        let mut file = ForDownloadFile::new(&answer, path, Instant::now()).with_writer(writer);
        file.apply_peers(&peers);
        info!(
            "Downloading {} ({} chunks) from {} peers",
            answer.name,
            file.chunk_count(),
            file.peer_count()
        );

        let rejected = self.downloads.lock().start(file);
        if let Err(file) = rejected {
            if let Some(writer) = file.writer {
                let _ = writer.stop().await;
            }
        }
    }

    /// Resolves listed peers to socket addresses, leaving out this node.
    async fn resolve_peers(&self, entries: &[PeerEntry]) -> Vec<(SocketAddr, Bytes)> {
        let others = other_peers(entries, &self.identity, self.udp_port);
        let mut peers = Vec::with_capacity(others.len());
        for entry in others {
            match resolve(&entry.identity, entry.port).await {
                Some(addr) => peers.push((addr, entry.bitfield.clone())),
                None => debug!("Cannot resolve peer {}:{}", entry.identity, entry.port),
            }
        }
        peers
    }

    fn download_path(&self, name: &str) -> Option<PathBuf> {
        let file_name = Path::new(name).file_name()?;
        if file_name != name {
            return None;
        }
        Some(self.download_dir.join(file_name))
    }

    async fn handle_chunk(&self, name: String, index: u16, data: Bytes, from: SocketAddr) {
        let verdict =
            self.downloads
                .lock()
                .on_chunk(&name, index, &data, from, Instant::now(), &self.stats);

        if let ChunkVerdict::Accepted(Some(writer)) = verdict {
            if let Err(e) = writer.enqueue(index, data).await {
                error!("Failed to queue chunk {} of {}: {}", index, name, e);
            }
        }
    }

    /// Answers a chunk request from the published file, or from a download
    /// in progress for chunks already on disk.
    async fn serve_chunks(&self, name: String, indices: Vec<u16>, to: SocketAddr) {
        let published = self
            .library
            .lock()
            .published(&name)
            .map(|file| (file.path.clone(), file.size));

        for index in indices {
            let source = match &published {
                Some(source) => Some(source.clone()),
                None => self.downloads.lock().persisted_source(&name, index),
            };
            let Some((path, size)) = source else {
                debug!("No chunk {} of {} to serve to {}", index, name, to);
                continue;
            };

            let data = match read_chunk(&path, size, index).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Cannot read chunk {} of {}: {}", index, name, e);
                    continue;
                }
            };

            let len = data.len() as u64;
            let datagram = Datagram::Chunk {
                name: name.clone(),
                index,
                data,
            }
            .encode();
            if let Err(e) = self.socket.send_to(&datagram, to).await {
                warn!("Failed to send chunk {} of {} to {}: {}", index, name, to, e);
                continue;
            }
            self.stats.record_upload(len);
            trace!("Sent chunk {} of {} to {}", index, name, to);
        }
    }

    async fn tick(&self) {
        let output = self.downloads.lock().tick(Instant::now(), &self.stats);

        let mut withdrawn = Vec::new();
        for completed in output.completed {
            let closed = match completed.writer {
                Some(writer) => match writer.stop().await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Failed to close {}: {}", completed.file.name, e);
                        false
                    }
                },
                None => true,
            };
            if closed {
                self.library.lock().publish(completed.file);
            } else {
                withdrawn.push(Message::UpdateChunks {
                    bitfield: Bitfield::new(completed.file.chunk_hashes.len()).to_wire(),
                    name: completed.file.name,
                });
            }
        }

        for message in output.tracker.into_iter().chain(withdrawn) {
            if self.tracker.send(message).await.is_err() {
                debug!("Tracker connection closed; dropping updates");
                break;
            }
        }

        for request in output.requests {
            let datagram = request.to_datagram().encode();
            match self.socket.send_to(&datagram, request.peer).await {
                Ok(_) => trace!(
                    "Requested {} chunks of {} from {}",
                    request.indices.len(),
                    request.name,
                    request.peer
                ),
                Err(e) => debug!("Failed to send request to {}: {}", request.peer, e),
            }
        }
    }
}

/// Entries of a tracker answer other than this node itself.
pub(crate) fn other_peers<'a>(
    entries: &'a [PeerEntry],
    identity: &str,
    port: u16,
) -> Vec<&'a PeerEntry> {
    entries
        .iter()
        .filter(|entry| !(entry.identity == identity && entry.port == port))
        .collect()
}

fn persist_callback(downloads: Weak<Mutex<Downloads>>, name: String) -> WriteCallback {
    Arc::new(move |index| {
        if let Some(downloads) = downloads.upgrade() {
            downloads.lock().mark_persisted(&name, index);
        }
    })
}

async fn resolve(identity: &str, port: u16) -> Option<SocketAddr> {
    if let Ok(ip) = identity.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, port));
    }
    lookup_host((identity, port)).await.ok()?.next()
}

async fn collect_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                dirs.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

fn stop_requested(changed: Result<(), watch::error::RecvError>, rx: &watch::Receiver<bool>) -> bool {
    changed.is_err() || *rx.borrow()
}

async fn run_tracker_writer(
    mut writer: FrameWriter<OwnedWriteHalf>,
    mut outbound: mpsc::Receiver<Message>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
            changed = shutdown.changed() => {
                if stop_requested(changed, &shutdown) {
                    break;
                }
                continue;
            }
        };

        if let Err(e) = writer.send(&message).await {
            warn!("Lost tracker connection: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn run_tracker_reader(
    shared: Arc<Shared>,
    mut reader: FrameReader<OwnedReadHalf>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            received = reader.receive() => received,
            changed = shutdown.changed() => {
                if stop_requested(changed, &shutdown) {
                    break;
                }
                continue;
            }
        };

        match received {
            Ok(message) => shared.handle_tracker_message(message).await,
            Err(ProtocolError::ConnectionClosed) => {
                warn!("Tracker closed the connection");
                break;
            }
            Err(e @ (ProtocolError::Io(_) | ProtocolError::FrameTooLarge(_))) => {
                warn!("Lost tracker connection: {}", e);
                break;
            }
            Err(e) => debug!("Ignoring malformed message from tracker: {}", e),
        }
    }
}

async fn run_datagrams(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; 65_535];

    loop {
        let received = tokio::select! {
            received = shared.socket.recv_from(&mut buf) => received,
            changed = shutdown.changed() => {
                if stop_requested(changed, &shutdown) {
                    break;
                }
                continue;
            }
        };

        let (n, from) = match received {
            Ok(received) => received,
            Err(e) => {
                debug!("UDP receive failed: {}", e);
                continue;
            }
        };

        let datagram = match Datagram::decode(Bytes::copy_from_slice(&buf[..n])) {
            Ok(datagram) => datagram,
            Err(e) => {
                debug!("Ignoring malformed datagram from {}: {}", from, e);
                continue;
            }
        };

        match datagram {
            Datagram::Chunk { name, index, data } => {
                shared.handle_chunk(name, index, data, from).await;
            }
            Datagram::RequestChunks { name, indices } => {
                debug!("{} requested {} chunks of {}", from, indices.len(), name);
                let shared = shared.clone();
                tokio::spawn(async move { shared.serve_chunks(name, indices, from).await });
            }
        }
    }
}

async fn run_ticker(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if stop_requested(changed, &shutdown) {
                    break;
                }
                continue;
            }
        }
        shared.tick().await;
    }
}

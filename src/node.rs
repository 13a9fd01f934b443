//! Peer node: publishes local files, downloads files from the swarm, and
//! serves chunks to other nodes.
//!
//! A node keeps one framed TCP connection to the tracker and one UDP socket
//! for chunk traffic. Downloads move from [`Download::AwaitingMetadata`] to
//! [`Download::Downloading`] once the tracker answers. A scheduler tick runs
//! every [`TICK_INTERVAL`](crate::constants::TICK_INTERVAL) and requests the
//! rarest missing chunks from the known holders, retrying timed out requests
//! and evicting peers that keep failing.
//!
//! Arriving chunks are verified against their SHA-1 digest before being
//! handed to the file's [`ChunkWriter`](crate::storage::ChunkWriter). Chunks
//! already on disk are served to other peers while the download is still
//! running. A finished download is published from its new location.

mod download;
mod error;
mod library;
mod scheduler;
mod service;

pub use download::{
    ChunkInfo, ChunkVerdict, CompletedDownload, Download, DownloadPhase, DownloadStatus,
    Downloads, ForDownloadFile, PeerDownloadState, RequestState,
};
pub use error::NodeError;
pub use library::LocalFile;
pub use scheduler::{ChunkRequest, TickOutput};
pub use service::{Node, NodeHandle, NodeStatus};

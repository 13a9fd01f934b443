//! chunkswarm - A tracker-coordinated peer-to-peer file sharing library
//!
//! A central tracker keeps the catalog of published files and, for every
//! connected node, which chunks of each file it holds. Nodes publish local
//! files, download files chunk by chunk from the other nodes in the swarm,
//! and serve the chunks they hold.
//!
//! # Modules
//!
//! - [`protocol`] - Framed tracker messages and node-to-node datagrams
//! - [`tracker`] - Swarm registry and the TCP server in front of it
//! - [`node`] - Publishing, downloading, chunk scheduling, and serving
//! - [`storage`] - Concurrent chunk writer and chunk reader
//! - [`bitfield`] - Packed chunk availability sets
//! - [`chunk`] - Chunk geometry and SHA-1 digests
//! - [`stats`] - Per-peer transfer statistics
//! - [`config`] - YAML configuration

pub mod bitfield;
pub mod chunk;
pub mod config;
pub mod constants;
pub mod node;
pub mod protocol;
pub mod stats;
pub mod storage;
pub mod tracker;

pub use bitfield::Bitfield;
pub use chunk::{chunk_count, chunk_size, ChunkHash, FileDigest};
pub use config::{Config, ConfigError, NodeConfig, TrackerConfig};
pub use node::{DownloadStatus, Node, NodeError, NodeHandle, NodeStatus};
pub use protocol::{Datagram, FileAnswer, Message, ProtocolError};
pub use stats::{PeerStatistics, StatsSnapshot};
pub use storage::{ChunkWriter, StorageError};
pub use tracker::{Registry, TrackerError, TrackerServer};

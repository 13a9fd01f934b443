use super::error::TrackerError;
use crate::bitfield::Bitfield;
use crate::chunk::{chunk_count, ChunkHash};
use crate::protocol::{FileAnswer, PeerEntry};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Registry key of one connected node. Every registration gets a fresh id.
pub type PeerId = u64;

/// Metadata of a published file. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub name: String,
    pub size: u64,
    pub file_hash: ChunkHash,
    pub chunk_hashes: Vec<ChunkHash>,
}

impl TrackedFile {
    pub fn chunk_count(&self) -> usize {
        self.chunk_hashes.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug)]
struct PeerRecord {
    identity: String,
    port: u16,
    bitfields: HashMap<String, Bitfield>,
}

#[derive(Debug, Default)]
struct State {
    files: HashMap<String, TrackedFile>,
    peers: BTreeMap<PeerId, PeerRecord>,
    next_peer: PeerId,
}

/// Files and the per-peer availability the tracker knows about.
///
/// All state sits behind one read-write lock, so every operation is atomic
/// with respect to the others and a query never sees a half-updated peer.
/// Peers are kept in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<State>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record for a newly connected node.
    ///
    /// There is no duplicate detection: a node that reconnects gets a new id.
    pub fn register_peer(&self, identity: impl Into<String>, port: u16) -> PeerId {
        let identity = identity.into();
        let mut state = self.state.write();
        let id = state.next_peer;
        state.next_peer += 1;

        info!("Registered peer {} as {}:{}", id, identity, port);
        state.peers.insert(
            id,
            PeerRecord {
                identity,
                port,
                bitfields: HashMap::new(),
            },
        );
        id
    }

    /// Drops a peer record and every bitfield it reported.
    pub fn unregister(&self, peer: PeerId) {
        if let Some(record) = self.state.write().peers.remove(&peer) {
            info!(
                "Unregistered peer {} ({}:{})",
                peer, record.identity, record.port
            );
        }
    }

    /// Tracks a new file and marks `publisher` as holding every chunk.
    pub fn publish_file(
        &self,
        publisher: PeerId,
        file: TrackedFile,
    ) -> Result<PublishOutcome, TrackerError> {
        validate(&file)?;

        let mut state = self.state.write();
        if !state.peers.contains_key(&publisher) {
            return Err(TrackerError::PeerNotRegistered(publisher));
        }
        if state.files.contains_key(&file.name) {
            debug!("Publish of {} rejected: already tracked", file.name);
            return Ok(PublishOutcome::AlreadyExists);
        }

        let full = Bitfield::full(file.chunk_count());
        if let Some(record) = state.peers.get_mut(&publisher) {
            record.bitfields.insert(file.name.clone(), full);
        }

        info!(
            "Peer {} published {} ({} bytes, {} chunks)",
            publisher,
            file.name,
            file.size,
            file.chunk_count()
        );
        state.files.insert(file.name.clone(), file);
        Ok(PublishOutcome::Accepted)
    }

    /// Returns the file's metadata and every peer holding at least one chunk.
    pub fn query(&self, name: &str) -> Option<FileAnswer> {
        let state = self.state.read();
        let file = state.files.get(name)?;

        let peers = state
            .peers
            .values()
            .filter_map(|record| {
                let bitfield = record.bitfields.get(name)?;
                if bitfield.is_empty() {
                    return None;
                }
                Some(PeerEntry {
                    identity: record.identity.clone(),
                    port: record.port,
                    bitfield: bitfield.to_wire(),
                })
            })
            .collect();

        Some(FileAnswer {
            name: file.name.clone(),
            size: file.size,
            file_hash: file.file_hash,
            chunk_hashes: file.chunk_hashes.clone(),
            peers,
        })
    }

    /// Replaces the bitfield `peer` reported for `name`.
    ///
    /// Returns `false` without changing anything when the file is not tracked
    /// or the peer is unknown.
    pub fn update_bitfield(&self, peer: PeerId, name: &str, bitfield: &Bytes) -> bool {
        let mut state = self.state.write();
        let Some(count) = state.files.get(name).map(TrackedFile::chunk_count) else {
            return false;
        };
        let Some(record) = state.peers.get_mut(&peer) else {
            return false;
        };

        let bitfield = Bitfield::from_bytes(bitfield, count);
        debug!(
            "Peer {} holds {}/{} chunks of {}",
            peer,
            bitfield.count(),
            count,
            name
        );
        record.bitfields.insert(name.to_string(), bitfield);
        true
    }

    /// Stops tracking `name` and forgets every peer's bitfield for it.
    pub fn remove(&self, requester: PeerId, name: &str) -> RemoveOutcome {
        let mut state = self.state.write();
        if state.files.remove(name).is_none() {
            return RemoveOutcome::NotFound;
        }
        for record in state.peers.values_mut() {
            record.bitfields.remove(name);
        }
        info!("Peer {} removed {}", requester, name);
        RemoveOutcome::Removed
    }

    pub fn file(&self, name: &str) -> Option<TrackedFile> {
        self.state.read().files.get(name).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.state.read().files.len()
    }

    pub fn peer_count(&self) -> usize {
        self.state.read().peers.len()
    }
}

fn validate(file: &TrackedFile) -> Result<(), TrackerError> {
    let invalid = |reason: String| TrackerError::InvalidFile {
        name: file.name.clone(),
        reason,
    };

    if file.size == 0 {
        return Err(invalid("file is empty".into()));
    }
    let expected = chunk_count(file.size);
    if file.chunk_hashes.len() != expected {
        return Err(invalid(format!(
            "expected {} chunk hashes, got {}",
            expected,
            file.chunk_hashes.len()
        )));
    }
    Ok(())
}

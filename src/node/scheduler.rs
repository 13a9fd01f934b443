//! The per-tick download decisions.
//!
//! Every tick walks each downloading file once: push the local bitfield to
//! the tracker when due, finish the file if every chunk is in, and otherwise
//! hand the rarest missing chunks to peers, least proven peers first.

use super::download::{CompletedDownload, Download, Downloads, ForDownloadFile, RequestState};
use crate::bitfield::Bitfield;
use crate::constants::{
    CHUNK_REQUEST_TIMEOUT, MAX_CHUNKS_PER_REQUEST, MAX_NODE_TIMEOUTS, MAX_TRIES_PER_CHUNK,
    TRACKER_REFRESH_INTERVAL,
};
use crate::protocol::{Datagram, Message};
use crate::stats::PeerStatistics;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, info};

/// One `RequestChunks` datagram to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub peer: SocketAddr,
    pub name: String,
    pub indices: Vec<u16>,
}

impl ChunkRequest {
    pub fn to_datagram(&self) -> Datagram {
        Datagram::RequestChunks {
            name: self.name.clone(),
            indices: self.indices.clone(),
        }
    }
}

/// Everything a tick decided. The caller performs the I/O.
#[derive(Default)]
pub struct TickOutput {
    /// Messages for the tracker connection.
    pub tracker: Vec<Message>,
    pub requests: Vec<ChunkRequest>,
    pub completed: Vec<CompletedDownload>,
}

fn timed_out(state: &RequestState, now: Instant) -> bool {
    match state.last_requested_at {
        None => true,
        Some(at) => now.saturating_duration_since(at) >= CHUNK_REQUEST_TIMEOUT,
    }
}

impl Downloads {
    /// Runs one scheduling pass over every downloading file.
    pub fn tick(&mut self, now: Instant, stats: &PeerStatistics) -> TickOutput {
        let mut out = TickOutput::default();
        let mut finished = Vec::new();

        for (name, download) in self.files.iter_mut() {
            let Download::Downloading(file) = download else {
                continue;
            };

            let complete = file.is_complete();
            let refresh_due =
                now.saturating_duration_since(file.last_refresh) > TRACKER_REFRESH_INTERVAL;
            if complete || refresh_due {
                file.last_refresh = now;
                // A complete file is on disk once its writer is stopped.
                let bitfield = if complete {
                    Bitfield::full(file.chunk_count())
                } else {
                    file.bitfield()
                };
                debug!(
                    "Pushing bitfield for {} ({}/{} chunks)",
                    name,
                    file.downloaded_count(),
                    file.chunk_count()
                );
                out.tracker.push(Message::UpdateChunks {
                    name: name.clone(),
                    bitfield: bitfield.to_wire(),
                });
                out.tracker.push(Message::UpdateFile { name: name.clone() });
            }

            if complete {
                finished.push(name.clone());
                continue;
            }

            for (peer, indices) in file.schedule(now, stats) {
                out.requests.push(ChunkRequest {
                    peer,
                    name: name.clone(),
                    indices,
                });
            }
        }

        for name in finished {
            if let Some(Download::Downloading(file)) = self.files.remove(&name) {
                let completed = (*file).into_completed(now);
                info!(
                    "Downloaded {} ({} bytes) in {:?}",
                    completed.file.name, completed.file.size, completed.elapsed
                );
                out.completed.push(completed);
            }
        }

        out
    }
}

impl ForDownloadFile {
    /// Missing chunks that are not in flight, rarest first.
    ///
    /// Rarity is the number of known peers holding the chunk. Equal rarity
    /// keeps index order.
    pub fn missing_by_rarity(&self, now: Instant) -> Vec<usize> {
        let in_flight: HashSet<usize> = self
            .peers
            .values()
            .flat_map(|peer| {
                peer.chunks
                    .iter()
                    .filter(|(_, state)| !timed_out(state, now))
                    .map(|(index, _)| *index)
            })
            .collect();

        let mut holders = vec![0usize; self.chunks.len()];
        for peer in self.peers.values() {
            for index in peer.chunks.keys() {
                if let Some(count) = holders.get_mut(*index) {
                    *count += 1;
                }
            }
        }

        let mut missing: Vec<usize> = self
            .chunks
            .iter()
            .filter(|chunk| !chunk.downloaded && !in_flight.contains(&chunk.index))
            .map(|chunk| chunk.index)
            .collect();
        missing.sort_by_key(|index| holders[*index]);
        missing
    }

    /// Peers ordered by measured speed, slowest first. Peers without
    /// samples count as zero.
    pub fn ranked_peers(&self, now: Instant, stats: &PeerStatistics) -> Vec<SocketAddr> {
        let mut ranked: Vec<(SocketAddr, f64)> = self
            .peers
            .keys()
            .map(|addr| (*addr, stats.average_speed_at(*addr, now).unwrap_or(0.0)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked.into_iter().map(|(addr, _)| addr).collect()
    }

    /// Assigns missing chunks to peers and stamps the requests.
    ///
    /// A chunk whose request to a peer timed out is retried until the peer
    /// has been asked [`MAX_TRIES_PER_CHUNK`] times; after that each attempt
    /// is a strike against the peer instead, and the chunk stays available to
    /// the next peer. A peer with more than [`MAX_NODE_TIMEOUTS`] strikes is
    /// evicted and the chunks it was assigned this tick go back to the
    /// remaining peers.
    pub(crate) fn schedule(
        &mut self,
        now: Instant,
        stats: &PeerStatistics,
    ) -> Vec<(SocketAddr, Vec<u16>)> {
        let mut missing = self.missing_by_rarity(now);
        let rank: HashMap<usize, usize> = missing
            .iter()
            .enumerate()
            .map(|(position, index)| (*index, position))
            .collect();
        let mut requests = Vec::new();

        for addr in self.ranked_peers(now, stats) {
            if missing.is_empty() {
                break;
            }
            let Some(peer) = self.peers.get_mut(&addr) else {
                continue;
            };

            let mut assigned: Vec<u16> = Vec::new();
            let mut evict = false;
            let mut i = 0;

            while i < missing.len() && assigned.len() < MAX_CHUNKS_PER_REQUEST {
                let index = missing[i];
                let Some(state) = peer.chunks.get_mut(&index) else {
                    i += 1;
                    continue;
                };
                if !timed_out(state, now) {
                    i += 1;
                    continue;
                }

                if state.tries >= MAX_TRIES_PER_CHUNK {
                    peer.consecutive_timeouts += 1;
                    debug!(
                        "Peer {} never answered for chunk {} of {} (strike {})",
                        addr, index, self.name, peer.consecutive_timeouts
                    );
                    if peer.consecutive_timeouts > MAX_NODE_TIMEOUTS {
                        evict = true;
                        break;
                    }
                    i += 1;
                    continue;
                }

                state.tries += 1;
                state.last_requested_at = Some(now);
                assigned.push(index as u16);
                missing.remove(i);
            }

            if evict {
                self.evict(addr);
                missing.extend(assigned.into_iter().map(usize::from));
                missing.sort_by_key(|index| rank.get(index).copied().unwrap_or(usize::MAX));
                continue;
            }
            if !assigned.is_empty() {
                requests.push((addr, assigned));
            }
        }

        requests
    }
}

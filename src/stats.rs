//! Per-peer transfer statistics.
//!
//! [`PeerStatistics`] keeps a short history of completed chunk downloads per
//! peer and derives an average speed over a trailing window. The scheduler
//! uses that speed to order peers; a peer with no recent samples has no speed
//! at all and is tried first.
//!
//! # Example
//!
//! ```
//! use chunkswarm::PeerStatistics;
//! use std::time::{Duration, Instant};
//!
//! let stats = PeerStatistics::new();
//! let peer = "127.0.0.1:9091".parse().unwrap();
//!
//! let requested = Instant::now();
//! stats.record_download(peer, 16_000, requested, requested + Duration::from_secs(2));
//!
//! let speed = stats.average_speed_at(peer, requested + Duration::from_secs(3));
//! assert_eq!(speed, Some(8_000.0));
//! ```

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::constants::{STATS_HISTORY_PER_PEER, STATS_WINDOW};

#[derive(Debug, Clone, Copy)]
struct Sample {
    bytes: u64,
    requested_at: Instant,
    received_at: Instant,
}

impl Sample {
    fn speed(&self) -> f64 {
        let elapsed = self
            .received_at
            .saturating_duration_since(self.requested_at)
            .max(Duration::from_micros(1));
        self.bytes as f64 / elapsed.as_secs_f64()
    }
}

#[derive(Default)]
struct Inner {
    uploaded: u64,
    downloaded: u64,
    history: HashMap<SocketAddr, VecDeque<Sample>>,
}

/// Thread-safe transfer accounting shared by every download and upload.
pub struct PeerStatistics {
    inner: Mutex<Inner>,
    window: Duration,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub uploaded: u64,
    pub downloaded: u64,
    /// Average download speed per peer in bytes/sec, `None` when the peer has
    /// no samples inside the window.
    pub peers: Vec<(SocketAddr, Option<f64>)>,
}

impl PeerStatistics {
    pub fn new() -> Self {
        Self::with_window(STATS_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            window,
        }
    }

    /// Counts bytes sent to other peers.
    pub fn record_upload(&self, bytes: u64) {
        self.inner.lock().uploaded += bytes;
    }

    /// Records one completed chunk download from `peer`.
    ///
    /// History per peer is bounded; the oldest sample goes first.
    pub fn record_download(
        &self,
        peer: SocketAddr,
        bytes: u64,
        requested_at: Instant,
        received_at: Instant,
    ) {
        let mut inner = self.inner.lock();
        inner.downloaded += bytes;

        let history = inner.history.entry(peer).or_default();
        if history.len() >= STATS_HISTORY_PER_PEER {
            history.pop_front();
        }
        history.push_back(Sample {
            bytes,
            requested_at,
            received_at,
        });
    }

    /// Mean per-chunk speed of `peer` in bytes/sec over the trailing window.
    pub fn average_speed(&self, peer: SocketAddr) -> Option<f64> {
        self.average_speed_at(peer, Instant::now())
    }

    /// Same as [`average_speed`](Self::average_speed) with an explicit clock.
    pub fn average_speed_at(&self, peer: SocketAddr, now: Instant) -> Option<f64> {
        let inner = self.inner.lock();
        let history = inner.history.get(&peer)?;

        let mut total = 0.0;
        let mut count = 0usize;
        for sample in history {
            if now.saturating_duration_since(sample.received_at) <= self.window {
                total += sample.speed();
                count += 1;
            }
        }

        if count == 0 {
            None
        } else {
            Some(total / count as f64)
        }
    }

    pub fn uploaded(&self) -> u64 {
        self.inner.lock().uploaded
    }

    pub fn downloaded(&self) -> u64 {
        self.inner.lock().downloaded
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let now = Instant::now();
        let (uploaded, downloaded, mut addrs) = {
            let inner = self.inner.lock();
            (
                inner.uploaded,
                inner.downloaded,
                inner.history.keys().copied().collect::<Vec<_>>(),
            )
        };
        addrs.sort();

        let peers = addrs
            .into_iter()
            .map(|addr| (addr, self.average_speed_at(addr, now)))
            .collect();

        StatsSnapshot {
            uploaded,
            downloaded,
            peers,
        }
    }
}

impl Default for PeerStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_no_data_means_no_speed() {
        let stats = PeerStatistics::new();
        assert_eq!(stats.average_speed(addr(1)), None);
    }

    #[test]
    fn test_average_over_samples() {
        let stats = PeerStatistics::new();
        let base = Instant::now();

        stats.record_download(addr(1), 1_000, base, base + Duration::from_secs(1));
        stats.record_download(addr(1), 3_000, base, base + Duration::from_secs(1));

        let speed = stats.average_speed_at(addr(1), base + Duration::from_secs(2));
        assert_eq!(speed, Some(2_000.0));
        assert_eq!(stats.downloaded(), 4_000);
    }

    #[test]
    fn test_samples_leave_window() {
        let stats = PeerStatistics::with_window(Duration::from_secs(100));
        let base = Instant::now();

        stats.record_download(addr(1), 1_000, base, base + Duration::from_secs(1));
        stats.record_download(
            addr(1),
            8_000,
            base + Duration::from_secs(150),
            base + Duration::from_secs(151),
        );

        let later = base + Duration::from_secs(160);
        assert_eq!(stats.average_speed_at(addr(1), later), Some(8_000.0));

        let much_later = base + Duration::from_secs(400);
        assert_eq!(stats.average_speed_at(addr(1), much_later), None);
    }

    #[test]
    fn test_history_is_bounded() {
        let stats = PeerStatistics::new();
        let base = Instant::now();
        for _ in 0..STATS_HISTORY_PER_PEER + 10 {
            stats.record_download(addr(1), 10, base, base + Duration::from_secs(1));
        }
        let inner = stats.inner.lock();
        assert_eq!(inner.history[&addr(1)].len(), STATS_HISTORY_PER_PEER);
    }

    #[test]
    fn test_concurrent_recording() {
        let stats = Arc::new(PeerStatistics::new());
        let base = Instant::now();

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        stats.record_upload(10);
                        stats.record_download(addr(i), 10, base, base + Duration::from_millis(5));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(stats.uploaded(), 8_000);
        assert_eq!(stats.downloaded(), 8_000);
        assert_eq!(stats.snapshot().peers.len(), 8);
    }
}

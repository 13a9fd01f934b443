//! Protocol constants and tuning parameters.
//!
//! Scheduler pacing, retry limits, chunk geometry, and transport limits used
//! throughout the tracker and node.

use std::time::Duration;

// ============================================================================
// Ports and paths
// ============================================================================

/// Default TCP port the tracker listens on
pub const DEFAULT_TRACKER_PORT: u16 = 9090;

/// Default UDP port a node listens on for chunk traffic
pub const DEFAULT_NODE_PORT: u16 = 9091;

/// Default location of the YAML configuration file
pub const DEFAULT_CONFIG_PATH: &str = "./config/config.yml";

/// Default directory for downloaded files
pub const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";

// ============================================================================
// Chunk geometry
// ============================================================================

/// Minimum chunk granularity in bytes
pub const CHUNK_BLOCK_SIZE: u64 = 16_000;

/// Upper bound on the number of chunks in one file (indices fit a `u16`)
pub const MAX_CHUNKS_PER_FILE: u64 = 1 << 16;

/// Length of every file and chunk digest (SHA-1)
pub const HASH_LEN: usize = 20;

// ============================================================================
// Scheduler
// ============================================================================

/// Interval between scheduler ticks
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// How often a downloading node pushes its bitfield and re-queries the tracker
pub const TRACKER_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Maximum chunk indices named in a single `RequestChunks` datagram
pub const MAX_CHUNKS_PER_REQUEST: usize = 100;

/// A request with no answer after this long is treated as timed out
pub const CHUNK_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Requests sent to one peer for one chunk before that peer strikes out on it
pub const MAX_TRIES_PER_CHUNK: u32 = 3;

/// Strikes a peer may accumulate before it is evicted from a file's swarm
pub const MAX_NODE_TIMEOUTS: u32 = 3;

// ============================================================================
// Statistics
// ============================================================================

/// Trailing window used for average download speed
pub const STATS_WINDOW: Duration = Duration::from_secs(100);

/// Samples kept per peer; older samples are dropped first
pub const STATS_HISTORY_PER_PEER: usize = 1024;

// ============================================================================
// Storage
// ============================================================================

/// Worker tasks per chunk writer
pub const WRITER_POOL_SIZE: usize = 10;

/// Capacity of the writer's hand-off queue
pub const WRITER_QUEUE_CAPACITY: usize = 64;

// ============================================================================
// Transport
// ============================================================================

/// Largest frame accepted on the tracker byte stream
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Largest UDP payload (65535 - 8 byte UDP header - 20 byte IP header)
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Bytes a `Chunk` datagram spends on framing besides the file name and payload
pub const CHUNK_DATAGRAM_OVERHEAD: usize = 1 + 4 + 2 + 4;

/// Capacity of outbound message queues
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

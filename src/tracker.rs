//! Central tracker: the swarm registry and the TCP server in front of it.
//!
//! The [`Registry`] records every tracked file and, for each connected node,
//! the bitfield of chunks it last reported per file. [`TrackerServer`] accepts
//! node connections and maps their framed messages onto registry operations.
//!
//! # Examples
//!
//! ```no_run
//! use chunkswarm::tracker::TrackerServer;
//! use tokio::sync::watch;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = TrackerServer::bind("0.0.0.0:9090").await?;
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//! let task = tokio::spawn(server.run(shutdown_rx));
//! // ...
//! shutdown_tx.send(true)?;
//! task.await??;
//! # Ok(())
//! # }
//! ```

mod error;
mod registry;
mod server;

pub use error::TrackerError;
pub use registry::{PeerId, PublishOutcome, Registry, RemoveOutcome, TrackedFile};
pub use server::TrackerServer;

#[cfg(test)]
mod tests;

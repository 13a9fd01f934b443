//! Wire protocol between nodes and the tracker, and between nodes.
//!
//! Two channels are used:
//!
//! - a reliable byte stream (TCP) between each node and the tracker, carrying
//!   [`Message`] frames: a `u32` little-endian length, a one-byte type tag, and
//!   the fields;
//! - unordered datagrams (UDP) between nodes, carrying one [`Datagram`] each:
//!   the type tag and fields, with no length prefix.
//!
//! Every message has an explicit encoder and decoder. Integers are
//! little-endian, strings and byte arrays are `u32`-length-prefixed, lists are
//! `u32`-count-prefixed, and digests are 20 raw bytes.
//!
//! # Examples
//!
//! ```
//! use chunkswarm::protocol::{Datagram, Message};
//!
//! let frame = Message::RequestFile { name: "movie.mkv".into() }.encode();
//! let decoded = Message::decode(frame.slice(4..)).unwrap();
//! assert_eq!(decoded, Message::RequestFile { name: "movie.mkv".into() });
//!
//! let request = Datagram::RequestChunks { name: "movie.mkv".into(), indices: vec![0, 3] };
//! assert_eq!(Datagram::decode(request.encode()).unwrap(), request);
//! ```

mod datagram;
mod error;
mod message;
mod transport;
mod wire;

pub use datagram::Datagram;
pub use error::ProtocolError;
pub use message::{FileAnswer, FileSuccessKind, Message, MessageId, PeerEntry};
pub use transport::{split, FrameReader, FrameWriter};

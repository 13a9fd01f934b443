use super::error::ProtocolError;
use super::wire::{self, WireReader};
use crate::chunk::ChunkHash;
use bytes::{BufMut, Bytes, BytesMut};

/// One-byte type tag leading every message on both transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Init = 0,
    PublishFile = 1,
    FileSuccess = 2,
    AlreadyExists = 3,
    NotFound = 4,
    UpdateChunks = 5,
    RequestFile = 6,
    UpdateFile = 7,
    AnswerNodes = 9,
    RemoveFile = 10,
    // Node to node
    RequestChunks = 11,
    Chunk = 12,
}

impl TryFrom<u8> for MessageId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Init),
            1 => Ok(MessageId::PublishFile),
            2 => Ok(MessageId::FileSuccess),
            3 => Ok(MessageId::AlreadyExists),
            4 => Ok(MessageId::NotFound),
            5 => Ok(MessageId::UpdateChunks),
            6 => Ok(MessageId::RequestFile),
            7 => Ok(MessageId::UpdateFile),
            9 => Ok(MessageId::AnswerNodes),
            10 => Ok(MessageId::RemoveFile),
            11 => Ok(MessageId::RequestChunks),
            12 => Ok(MessageId::Chunk),
            _ => Err(ProtocolError::InvalidMessageId(value)),
        }
    }
}

/// Which request a `FileSuccess` acknowledges.
///
/// The wire value reuses the tag of the acknowledged request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileSuccessKind {
    Publish = MessageId::PublishFile as u8,
    Remove = MessageId::RemoveFile as u8,
}

impl TryFrom<u8> for FileSuccessKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FileSuccessKind::Publish),
            10 => Ok(FileSuccessKind::Remove),
            _ => Err(ProtocolError::InvalidField {
                field: "kind",
                reason: format!("unknown success kind {}", value),
            }),
        }
    }
}

/// A peer holding some chunks of a file, as listed in a tracker answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    /// Host name or IP address the peer registered with.
    pub identity: String,
    /// UDP port the peer serves chunks on.
    pub port: u16,
    /// Packed bitfield of the chunks the peer last reported.
    pub bitfield: Bytes,
}

/// File metadata plus the current swarm, sent in reply to a file query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAnswer {
    pub name: String,
    pub size: u64,
    pub file_hash: ChunkHash,
    pub chunk_hashes: Vec<ChunkHash>,
    pub peers: Vec<PeerEntry>,
}

/// Messages exchanged between a node and the tracker over the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // Node to tracker
    Init {
        identity: String,
        port: u16,
    },
    PublishFile {
        name: String,
        size: u64,
        file_hash: ChunkHash,
        chunk_hashes: Vec<ChunkHash>,
    },
    RequestFile {
        name: String,
    },
    UpdateChunks {
        name: String,
        bitfield: Bytes,
    },
    UpdateFile {
        name: String,
    },
    RemoveFile {
        name: String,
    },
    // Tracker to node
    FileSuccess {
        name: String,
        kind: FileSuccessKind,
    },
    AlreadyExists {
        name: String,
    },
    NotFound {
        name: String,
    },
    AnswerNodes(FileAnswer),
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::Init { .. } => MessageId::Init,
            Message::PublishFile { .. } => MessageId::PublishFile,
            Message::RequestFile { .. } => MessageId::RequestFile,
            Message::UpdateChunks { .. } => MessageId::UpdateChunks,
            Message::UpdateFile { .. } => MessageId::UpdateFile,
            Message::RemoveFile { .. } => MessageId::RemoveFile,
            Message::FileSuccess { .. } => MessageId::FileSuccess,
            Message::AlreadyExists { .. } => MessageId::AlreadyExists,
            Message::NotFound { .. } => MessageId::NotFound,
            Message::AnswerNodes(_) => MessageId::AnswerNodes,
        }
    }

    /// Encodes the message as one length-prefixed frame.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(64);
        body.put_u8(self.id() as u8);

        match self {
            Message::Init { identity, port } => {
                wire::put_str(&mut body, identity);
                body.put_u16_le(*port);
            }
            Message::PublishFile {
                name,
                size,
                file_hash,
                chunk_hashes,
            } => {
                wire::put_str(&mut body, name);
                body.put_u64_le(*size);
                body.put_slice(file_hash);
                wire::put_hashes(&mut body, chunk_hashes);
            }
            Message::UpdateChunks { name, bitfield } => {
                wire::put_str(&mut body, name);
                wire::put_bytes(&mut body, bitfield);
            }
            Message::FileSuccess { name, kind } => {
                wire::put_str(&mut body, name);
                body.put_u8(*kind as u8);
            }
            Message::RequestFile { name }
            | Message::UpdateFile { name }
            | Message::RemoveFile { name }
            | Message::AlreadyExists { name }
            | Message::NotFound { name } => {
                wire::put_str(&mut body, name);
            }
            Message::AnswerNodes(answer) => {
                wire::put_str(&mut body, &answer.name);
                body.put_u64_le(answer.size);
                body.put_slice(&answer.file_hash);
                wire::put_hashes(&mut body, &answer.chunk_hashes);
                body.put_u32_le(answer.peers.len() as u32);
                for peer in &answer.peers {
                    wire::put_str(&mut body, &peer.identity);
                    body.put_u16_le(peer.port);
                    wire::put_bytes(&mut body, &peer.bitfield);
                }
            }
        }

        let mut frame = BytesMut::with_capacity(4 + body.len());
        frame.put_u32_le(body.len() as u32);
        frame.put_slice(&body);
        frame.freeze()
    }

    /// Decodes a frame payload (type tag and fields, without the length prefix).
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = WireReader::new(payload);
        let id = MessageId::try_from(r.u8("id")?)?;

        let message = match id {
            MessageId::Init => Message::Init {
                identity: r.string("identity")?,
                port: r.u16("port")?,
            },
            MessageId::PublishFile => Message::PublishFile {
                name: r.string("name")?,
                size: r.u64("size")?,
                file_hash: r.hash("file_hash")?,
                chunk_hashes: r.hashes("chunk_hashes")?,
            },
            MessageId::RequestFile => Message::RequestFile {
                name: r.string("name")?,
            },
            MessageId::UpdateChunks => Message::UpdateChunks {
                name: r.string("name")?,
                bitfield: r.bytes("bitfield")?,
            },
            MessageId::UpdateFile => Message::UpdateFile {
                name: r.string("name")?,
            },
            MessageId::RemoveFile => Message::RemoveFile {
                name: r.string("name")?,
            },
            MessageId::FileSuccess => Message::FileSuccess {
                name: r.string("name")?,
                kind: FileSuccessKind::try_from(r.u8("kind")?)?,
            },
            MessageId::AlreadyExists => Message::AlreadyExists {
                name: r.string("name")?,
            },
            MessageId::NotFound => Message::NotFound {
                name: r.string("name")?,
            },
            MessageId::AnswerNodes => {
                let name = r.string("name")?;
                let size = r.u64("size")?;
                let file_hash = r.hash("file_hash")?;
                let chunk_hashes = r.hashes("chunk_hashes")?;
                let count = r.u32("peers")? as usize;
                let mut peers = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    peers.push(PeerEntry {
                        identity: r.string("peer.identity")?,
                        port: r.u16("peer.port")?,
                        bitfield: r.bytes("peer.bitfield")?,
                    });
                }
                Message::AnswerNodes(FileAnswer {
                    name,
                    size,
                    file_hash,
                    chunk_hashes,
                    peers,
                })
            }
            MessageId::RequestChunks | MessageId::Chunk => {
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "{:?} is a datagram message",
                    id
                )));
            }
        };

        r.finish()?;
        Ok(message)
    }
}

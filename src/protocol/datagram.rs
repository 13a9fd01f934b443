use super::error::ProtocolError;
use super::message::MessageId;
use super::wire::{self, WireReader};
use bytes::{BufMut, Bytes, BytesMut};

/// Messages exchanged directly between nodes, one per UDP datagram.
///
/// Datagrams carry the type tag and fields but no length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    RequestChunks {
        name: String,
        indices: Vec<u16>,
    },
    Chunk {
        name: String,
        index: u16,
        data: Bytes,
    },
}

impl Datagram {
    pub fn id(&self) -> MessageId {
        match self {
            Datagram::RequestChunks { .. } => MessageId::RequestChunks,
            Datagram::Chunk { .. } => MessageId::Chunk,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.id() as u8);

        match self {
            Datagram::RequestChunks { name, indices } => {
                wire::put_str(&mut buf, name);
                wire::put_indices(&mut buf, indices);
            }
            Datagram::Chunk { name, index, data } => {
                wire::put_str(&mut buf, name);
                buf.put_u16_le(*index);
                wire::put_bytes(&mut buf, data);
            }
        }

        buf.freeze()
    }

    pub fn decode(data: Bytes) -> Result<Self, ProtocolError> {
        let mut r = WireReader::new(data);
        let id = MessageId::try_from(r.u8("id")?)?;

        let datagram = match id {
            MessageId::RequestChunks => Datagram::RequestChunks {
                name: r.string("name")?,
                indices: r.indices("indices")?,
            },
            MessageId::Chunk => Datagram::Chunk {
                name: r.string("name")?,
                index: r.u16("index")?,
                data: r.bytes("data")?,
            },
            other => {
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "{:?} is a tracker message",
                    other
                )));
            }
        };

        r.finish()?;
        Ok(datagram)
    }
}

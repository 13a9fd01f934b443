//! Field-level primitives of the binary layout.
//!
//! Integers are fixed-width little-endian. Strings and byte arrays carry a
//! `u32` length prefix, lists a `u32` element count. Digests are written as
//! 20 raw bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::ProtocolError;
use crate::chunk::ChunkHash;
use crate::constants::HASH_LEN;

pub(crate) fn put_str(buf: &mut BytesMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

pub(crate) fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value);
}

pub(crate) fn put_hashes(buf: &mut BytesMut, hashes: &[ChunkHash]) {
    buf.put_u32_le(hashes.len() as u32);
    for hash in hashes {
        buf.put_slice(hash);
    }
}

pub(crate) fn put_indices(buf: &mut BytesMut, indices: &[u16]) {
    buf.put_u32_le(indices.len() as u32);
    for index in indices {
        buf.put_u16_le(*index);
    }
}

/// Reads fields in order from a message body, failing on short input.
pub(crate) struct WireReader {
    data: Bytes,
}

impl WireReader {
    pub(crate) fn new(data: Bytes) -> Self {
        Self { data }
    }

    fn need(&self, field: &'static str, len: usize) -> Result<(), ProtocolError> {
        if self.data.remaining() < len {
            return Err(ProtocolError::Truncated {
                field,
                needed: len - self.data.remaining(),
            });
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, ProtocolError> {
        self.need(field, 1)?;
        Ok(self.data.get_u8())
    }

    pub(crate) fn u16(&mut self, field: &'static str) -> Result<u16, ProtocolError> {
        self.need(field, 2)?;
        Ok(self.data.get_u16_le())
    }

    pub(crate) fn u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        self.need(field, 4)?;
        Ok(self.data.get_u32_le())
    }

    pub(crate) fn u64(&mut self, field: &'static str) -> Result<u64, ProtocolError> {
        self.need(field, 8)?;
        Ok(self.data.get_u64_le())
    }

    pub(crate) fn bytes(&mut self, field: &'static str) -> Result<Bytes, ProtocolError> {
        let len = self.u32(field)? as usize;
        self.need(field, len)?;
        Ok(self.data.split_to(len))
    }

    pub(crate) fn string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let raw = self.bytes(field)?;
        String::from_utf8(raw.to_vec()).map_err(|e| ProtocolError::InvalidField {
            field,
            reason: e.to_string(),
        })
    }

    pub(crate) fn hash(&mut self, field: &'static str) -> Result<ChunkHash, ProtocolError> {
        self.need(field, HASH_LEN)?;
        let mut hash = [0u8; HASH_LEN];
        self.data.copy_to_slice(&mut hash);
        Ok(hash)
    }

    pub(crate) fn hashes(&mut self, field: &'static str) -> Result<Vec<ChunkHash>, ProtocolError> {
        let count = self.u32(field)? as usize;
        self.need(field, count.saturating_mul(HASH_LEN))?;
        (0..count).map(|_| self.hash(field)).collect()
    }

    pub(crate) fn indices(&mut self, field: &'static str) -> Result<Vec<u16>, ProtocolError> {
        let count = self.u32(field)? as usize;
        self.need(field, count.saturating_mul(2))?;
        Ok((0..count).map(|_| self.data.get_u16_le()).collect())
    }

    /// Fails if any bytes remain unread.
    pub(crate) fn finish(self) -> Result<(), ProtocolError> {
        match self.data.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}

//! Bit-packed chunk availability sets.
//!
//! Bits are numbered from the high bit of the first byte: chunk `i` lives in
//! byte `i / 8` at bit `7 - (i % 8)`. The same layout is used on the wire and
//! in memory.

use bytes::Bytes;

/// Packs a set of chunk indices into a bitfield.
///
/// The result is `max / 8 + 1` bytes long, so it is never empty; an empty set
/// encodes as a single zero byte.
pub fn encode<I>(indices: I) -> Bytes
where
    I: IntoIterator<Item = usize>,
{
    let indices: Vec<usize> = indices.into_iter().collect();
    let max = indices.iter().copied().max().unwrap_or(0);
    let mut bits = vec![0u8; max / 8 + 1];

    for index in indices {
        bits[index / 8] |= 1 << (7 - (index % 8));
    }

    Bytes::from(bits)
}

/// Unpacks every set bit of `bytes` into ascending chunk indices.
///
/// Any length is accepted. Positions past the file's chunk count must be
/// ignored by the caller; [`Bitfield::from_bytes`] does that masking.
pub fn decode(bytes: &[u8]) -> Vec<usize> {
    let mut indices = Vec::new();
    for (byte_index, byte) in bytes.iter().enumerate() {
        if *byte == 0 {
            continue;
        }
        for bit in 0..8 {
            if byte & (0x80 >> bit) != 0 {
                indices.push(byte_index * 8 + bit);
            }
        }
    }
    indices
}

/// A set of chunk indices over a fixed universe of `chunk_count` chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    chunk_count: usize,
}

impl Bitfield {
    /// Creates an empty bitfield for the given number of chunks.
    pub fn new(chunk_count: usize) -> Self {
        Self {
            bits: vec![0; chunk_count.div_ceil(8)],
            chunk_count,
        }
    }

    /// Creates a bitfield with every chunk present.
    pub fn full(chunk_count: usize) -> Self {
        let mut bf = Self {
            bits: vec![0xFF; chunk_count.div_ceil(8)],
            chunk_count,
        };
        bf.clear_spare_bits();
        bf
    }

    /// Creates a bitfield from wire bytes of any length.
    ///
    /// Short input is zero-padded; bits at or beyond `chunk_count` are dropped.
    pub fn from_bytes(bytes: &[u8], chunk_count: usize) -> Self {
        let expected = chunk_count.div_ceil(8);
        let mut bits = bytes[..bytes.len().min(expected)].to_vec();
        bits.resize(expected, 0);

        let mut bf = Self { bits, chunk_count };
        bf.clear_spare_bits();
        bf
    }

    /// Creates a bitfield holding exactly `indices`; out-of-range indices are ignored.
    pub fn from_indices<I>(indices: I, chunk_count: usize) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let mut bf = Self::new(chunk_count);
        for index in indices {
            bf.set(index);
        }
        bf
    }

    pub fn has(&self, index: usize) -> bool {
        if index >= self.chunk_count {
            return false;
        }
        (self.bits[index / 8] >> (7 - (index % 8))) & 1 == 1
    }

    pub fn set(&mut self, index: usize) {
        if index >= self.chunk_count {
            return;
        }
        self.bits[index / 8] |= 1 << (7 - (index % 8));
    }

    pub fn clear(&mut self, index: usize) {
        if index >= self.chunk_count {
            return;
        }
        self.bits[index / 8] &= !(1 << (7 - (index % 8)));
    }

    /// Returns the number of chunks present.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.count() == self.chunk_count
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Returns the compact wire form produced by [`encode`].
    pub fn to_wire(&self) -> Bytes {
        encode(self.indices())
    }

    /// Returns the present chunk indices in ascending order.
    pub fn indices(&self) -> Vec<usize> {
        decode(&self.bits)
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.chunk_count;
        if spare > 0 && spare < 8 {
            let last = self.bits.len() - 1;
            self.bits[last] &= 0xFFu8 << spare;
        }
    }
}

// ==========================================
// Phits: the fixed-width unit the filter consumes
// ==========================================

use crate::error::ConfigError;

/// Widest supported chunk, one 512-bit bus word.
pub const MAX_CHUNK_WIDTH: usize = 64;

/// Validated chunk width in bytes (1..=64).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkWidth(usize);

impl ChunkWidth {
    /// 64-byte phits; the whole Ethernet/IPv4/UDP header fits in chunk 0.
    pub const REFERENCE: ChunkWidth = ChunkWidth(MAX_CHUNK_WIDTH);

    pub fn new(bytes: usize) -> Result<Self, ConfigError> {
        if bytes == 0 || bytes > MAX_CHUNK_WIDTH {
            return Err(ConfigError::ChunkWidth {
                max: MAX_CHUNK_WIDTH,
                actual: bytes,
            });
        }
        Ok(Self(bytes))
    }

    pub fn bytes(self) -> usize {
        self.0
    }

    /// Keep mask with every byte of a full chunk set.
    pub fn full_mask(self) -> u64 {
        mask_for(self.0)
    }

    /// Number of chunks a packet of `len` bytes occupies. Never zero.
    pub fn chunks_for(self, len: usize) -> usize {
        len.div_ceil(self.0).max(1)
    }
}

impl Default for ChunkWidth {
    fn default() -> Self {
        Self::REFERENCE
    }
}

fn mask_for(len: usize) -> u64 {
    if len >= 64 { u64::MAX } else { (1u64 << len) - 1 }
}

/// One phit of a packet.
///
/// `keep` has bit `i` set when byte `i` of `data` is meaningful; `last`
/// marks the final chunk of the packet. Bytes past the configured width
/// are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data: [u8; MAX_CHUNK_WIDTH],
    pub keep: u64,
    pub last: bool,
}

impl Chunk {
    /// Build a chunk from up to 64 leading bytes; the rest is dropped.
    pub fn new(bytes: &[u8], last: bool) -> Self {
        let len = bytes.len().min(MAX_CHUNK_WIDTH);
        let mut data = [0u8; MAX_CHUNK_WIDTH];
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            data,
            keep: mask_for(len),
            last,
        }
    }

    pub fn is_valid(&self, byte: usize) -> bool {
        byte < MAX_CHUNK_WIDTH && self.keep & (1u64 << byte) != 0
    }

    /// Count of leading valid bytes.
    pub fn valid_len(&self) -> usize {
        self.keep.trailing_ones() as usize
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.valid_len()]
    }
}

/// Lazily cuts a packet into phits, one chunk at a time.
///
/// Every chunk but the last is full; the last carries a partial keep
/// mask and `last = true`. An empty packet still yields one chunk so
/// that the packet boundary is visible downstream.
#[derive(Debug, Clone)]
pub struct PacketChunks<'a> {
    packet: &'a [u8],
    width: usize,
    offset: usize,
    done: bool,
}

impl<'a> PacketChunks<'a> {
    pub fn new(packet: &'a [u8], width: ChunkWidth) -> Self {
        Self {
            packet,
            width: width.bytes(),
            offset: 0,
            done: false,
        }
    }
}

impl Iterator for PacketChunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        let end = (self.offset + self.width).min(self.packet.len());
        let last = end == self.packet.len();
        let chunk = Chunk::new(&self.packet[self.offset..end], last);
        self.offset = end;
        self.done = last;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let left = (self.packet.len() - self.offset).div_ceil(self.width).max(1);
        (left, Some(left))
    }
}

impl ExactSizeIterator for PacketChunks<'_> {}

/// Cut a whole packet into the phit stream the classifier consumes.
pub fn split_packet(packet: &[u8], width: ChunkWidth) -> Vec<Chunk> {
    PacketChunks::new(packet, width).collect()
}

/// Reassemble the valid bytes of a chunk sequence.
pub fn join_chunks<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> Vec<u8> {
    chunks
        .into_iter()
        .flat_map(|c| c.payload().iter().copied())
        .collect()
}

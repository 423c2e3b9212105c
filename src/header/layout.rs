use std::ops::Range;

use crate::chunk::ChunkWidth;

pub const ETH_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

/// Bytes from frame start to the end of the UDP header.
pub const HEADER_LEN: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderField {
    EthDst,
    EthSrc,
    EthType,
    IpVersionIhl,
    IpDscpEcn,
    IpTotalLength,
    IpIdentification,
    IpFlagsFragment,
    IpTtl,
    IpProtocol,
    IpChecksum,
    IpSrc,
    IpDst,
    UdpSrcPort,
    UdpDstPort,
    UdpLength,
    UdpChecksum,
}

impl HeaderField {
    pub(crate) fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Where a field lives, relative to the start of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpan {
    pub field: HeaderField,
    pub offset: usize,
    pub len: usize,
}

impl FieldSpan {
    const fn new(field: HeaderField, offset: usize, len: usize) -> Self {
        Self { field, offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn bytes(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// Bit mask over frame bytes covered by this field.
    pub(crate) fn byte_mask(&self) -> u64 {
        ((1u64 << self.len) - 1) << self.offset
    }
}

/// Ethernet II, IPv4 without options, UDP.
pub const FIELD_TABLE: [FieldSpan; 17] = [
    FieldSpan::new(HeaderField::EthDst, 0, 6),
    FieldSpan::new(HeaderField::EthSrc, 6, 6),
    FieldSpan::new(HeaderField::EthType, 12, 2),
    FieldSpan::new(HeaderField::IpVersionIhl, 14, 1),
    FieldSpan::new(HeaderField::IpDscpEcn, 15, 1),
    FieldSpan::new(HeaderField::IpTotalLength, 16, 2),
    FieldSpan::new(HeaderField::IpIdentification, 18, 2),
    FieldSpan::new(HeaderField::IpFlagsFragment, 20, 2),
    FieldSpan::new(HeaderField::IpTtl, 22, 1),
    FieldSpan::new(HeaderField::IpProtocol, 23, 1),
    FieldSpan::new(HeaderField::IpChecksum, 24, 2),
    FieldSpan::new(HeaderField::IpSrc, 26, 4),
    FieldSpan::new(HeaderField::IpDst, 30, 4),
    FieldSpan::new(HeaderField::UdpSrcPort, 34, 2),
    FieldSpan::new(HeaderField::UdpDstPort, 36, 2),
    FieldSpan::new(HeaderField::UdpLength, 38, 2),
    FieldSpan::new(HeaderField::UdpChecksum, 40, 2),
];

/// Field → chunk-index mapping for one chunk width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    width: ChunkWidth,
}

impl HeaderLayout {
    pub fn new(width: ChunkWidth) -> Self {
        Self { width }
    }

    pub fn width(&self) -> ChunkWidth {
        self.width
    }

    /// Index of the chunk carrying the last header byte. Once this chunk
    /// has been consumed every header field that will ever arrive has.
    pub fn decision_chunk(&self) -> usize {
        (HEADER_LEN - 1) / self.width.bytes()
    }

    /// Header bytes (frame offsets) carried by chunk `idx`. Empty past the
    /// decision chunk.
    pub fn header_bytes_in(&self, idx: usize) -> Range<usize> {
        let w = self.width.bytes();
        let start = idx.saturating_mul(w).min(HEADER_LEN);
        let end = start.saturating_add(w).min(HEADER_LEN);
        start..end
    }

    /// Fields whose final byte is carried by chunk `idx`.
    pub fn fields_completing_in(&self, idx: usize) -> impl Iterator<Item = &'static FieldSpan> {
        let w = self.width.bytes();
        FIELD_TABLE.iter().filter(move |span| (span.end() - 1) / w == idx)
    }

    /// Chunk index that owns a given field's last byte.
    pub fn owning_chunk(&self, field: HeaderField) -> usize {
        FIELD_TABLE
            .iter()
            .find(|span| span.field == field)
            .map(|span| (span.end() - 1) / self.width.bytes())
            .unwrap_or(0)
    }
}

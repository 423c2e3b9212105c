use crate::chunk::{Chunk, ChunkWidth};
use crate::header::layout::{HEADER_LEN, HeaderLayout};
use crate::header::parsed::ParsedHeader;

/// Rebuilds the Ethernet/IPv4/UDP header of the packet in flight one
/// chunk at a time.
///
/// Each chunk contributes only the header bytes that fall inside its
/// offset range; a field becomes visible in [`ParsedHeader`] on the chunk
/// that delivers its last byte, and only if every one of its bytes was
/// marked valid. Exactly one packet is tracked at a time.
#[derive(Debug, Clone)]
pub struct HeaderReconstructor {
    layout: HeaderLayout,
    next_idx: usize,
    between_packets: bool,
    raw: [u8; HEADER_LEN],
    arrived: u64,
    header: ParsedHeader,
}

impl HeaderReconstructor {
    pub fn new(width: ChunkWidth) -> Self {
        Self {
            layout: HeaderLayout::new(width),
            next_idx: 0,
            between_packets: true,
            raw: [0u8; HEADER_LEN],
            arrived: 0,
            header: ParsedHeader::default(),
        }
    }

    pub fn layout(&self) -> &HeaderLayout {
        &self.layout
    }

    pub fn header(&self) -> &ParsedHeader {
        &self.header
    }

    /// Index the next consumed chunk will get.
    pub fn next_chunk_index(&self) -> usize {
        self.next_idx
    }

    pub fn is_ipv4(&self) -> Option<bool> {
        self.header.is_ipv4()
    }

    pub fn is_udp(&self) -> Option<bool> {
        self.header.is_udp()
    }

    /// Drop all packet state; the next chunk is treated as a first chunk.
    pub fn reset(&mut self) {
        self.next_idx = 0;
        self.between_packets = true;
        self.raw = [0u8; HEADER_LEN];
        self.arrived = 0;
        self.header.reset();
    }

    /// Consume one chunk and return the index it occupied in its packet.
    ///
    /// The header stays readable after the last chunk of a packet; it is
    /// cleared when the first chunk of the following packet arrives.
    pub fn consume(&mut self, chunk: &Chunk) -> usize {
        if self.between_packets {
            self.reset();
            self.between_packets = false;
        }

        let idx = self.next_idx;
        self.fill(chunk, idx);

        if chunk.last {
            self.next_idx = 0;
            self.between_packets = true;
        } else {
            self.next_idx = idx.saturating_add(1);
        }
        idx
    }

    fn fill(&mut self, chunk: &Chunk, idx: usize) {
        let range = self.layout.header_bytes_in(idx);
        if range.is_empty() {
            return;
        }

        let base = range.start;
        for pos in range {
            let off = pos - base;
            if chunk.is_valid(off) {
                self.raw[pos] = chunk.data[off];
                self.arrived |= 1u64 << pos;
            }
        }

        for span in self.layout.fields_completing_in(idx) {
            let mask = span.byte_mask();
            if self.arrived & mask == mask {
                self.header.set_field(span.field, &self.raw[span.bytes()]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use super::*;
    use crate::chunk::split_packet;
    use crate::config::KeyEndpoint;
    use crate::header::frame::build_udp_frame;
    use crate::header::layout::HeaderField;

    fn frame() -> Vec<u8> {
        build_udp_frame(
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 5000),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 9000),
            &[0x55; 100],
        )
    }

    #[test]
    fn reference_width_fills_everything_from_chunk_zero() {
        let chunks = split_packet(&frame(), ChunkWidth::REFERENCE);
        let mut rec = HeaderReconstructor::new(ChunkWidth::REFERENCE);

        assert_eq!(rec.consume(&chunks[0]), 0);
        assert!(rec.header().is_complete());
        assert_eq!(rec.is_ipv4(), Some(true));
        assert_eq!(rec.is_udp(), Some(true));
        assert_eq!(
            rec.header().lookup_key(KeyEndpoint::Destination),
            Some((Ipv4Addr::new(10, 0, 0, 5), 9000))
        );
    }

    #[test]
    fn narrow_width_populates_fields_on_owning_chunk() {
        let width = ChunkWidth::new(8).unwrap();
        let chunks = split_packet(&frame(), width);
        let mut rec = HeaderReconstructor::new(width);

        rec.consume(&chunks[0]);
        assert_eq!(rec.is_ipv4(), None);
        assert!(rec.header().is_populated(HeaderField::EthDst));

        rec.consume(&chunks[1]);
        assert_eq!(rec.is_ipv4(), Some(true));
        assert_eq!(rec.is_udp(), None);

        rec.consume(&chunks[2]);
        assert_eq!(rec.is_udp(), Some(true));

        rec.consume(&chunks[3]);
        // IpDst spans bytes 30..34, i.e. chunks 3 and 4.
        assert!(!rec.header().is_populated(HeaderField::IpDst));

        rec.consume(&chunks[4]);
        assert_eq!(rec.header().ipv4.dst, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(rec.header().udp.dst_port, 9000);

        assert_eq!(rec.consume(&chunks[5]), 5);
        assert!(rec.header().is_complete());
    }

    #[test]
    fn index_resets_after_last_chunk_and_header_clears_on_next_packet() {
        let chunks = split_packet(&frame(), ChunkWidth::new(32).unwrap());
        let mut rec = HeaderReconstructor::new(ChunkWidth::new(32).unwrap());

        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(rec.consume(c), i);
        }
        assert_eq!(rec.next_chunk_index(), 0);
        assert!(rec.header().is_complete());

        // A one-byte runt packet: nothing beyond the first byte is known.
        let runt = Chunk::new(&[0xFF], true);
        assert_eq!(rec.consume(&runt), 0);
        assert_eq!(rec.is_ipv4(), None);
        assert!(!rec.header().is_populated(HeaderField::EthDst));
    }

    #[test]
    fn invalid_bytes_leave_field_unset() {
        let mut chunk = split_packet(&frame(), ChunkWidth::REFERENCE).remove(0);
        // Knock out byte 23 (IP protocol).
        chunk.keep &= !(1u64 << 23);

        let mut rec = HeaderReconstructor::new(ChunkWidth::REFERENCE);
        rec.consume(&chunk);
        assert_eq!(rec.is_ipv4(), Some(true));
        assert_eq!(rec.is_udp(), None);
    }
}

// ==========================================
// Frame construction (the inverse of reconstruction)
// ==========================================

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::header::layout::{ETH_HEADER_LEN, IPV4_HEADER_LEN, UDP_HEADER_LEN};
use crate::header::parsed::{EthernetHeader, Ipv4Header, ParsedHeader};

const DEFAULT_TTL: u8 = 64;

/// Wrap an L3 datagram in an Ethernet II header with zero MACs.
///
/// NFQUEUE hands over packets starting at the IP header while the
/// classifier works on full frames, so the link header is synthesised. The
/// ethertype follows the IP version nibble: IPv4 gets 0x0800, anything
/// else gets 0 and is dropped as non-IPv4.
pub fn ethernet_encapsulate(l3: &[u8]) -> Vec<u8> {
    let ether_type = match l3.first() {
        Some(b) if b >> 4 == 4 => EthernetHeader::IPV4,
        _ => 0,
    };

    let mut frame = Vec::with_capacity(ETH_HEADER_LEN + l3.len());
    frame.extend_from_slice(&[0u8; 12]);
    frame.extend_from_slice(&ether_type.to_be_bytes());
    frame.extend_from_slice(l3);
    frame
}

/// Standard one's-complement sum over a 20-byte IPv4 header.
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)]) as u32)
        .sum();
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Ethernet + IPv4 (no options) around an arbitrary L4 body.
pub fn build_ipv4_frame(protocol: u8, src: Ipv4Addr, dst: Ipv4Addr, l4: &[u8]) -> Vec<u8> {
    let mut hdr = ParsedHeader::default();
    hdr.eth.ether_type = EthernetHeader::IPV4;
    hdr.ipv4 = Ipv4Header {
        version: 4,
        ihl: 5,
        total_length: (IPV4_HEADER_LEN + l4.len()) as u16,
        flags: 0b010,
        ttl: DEFAULT_TTL,
        protocol,
        src,
        dst,
        ..Ipv4Header::default()
    };

    let bytes = hdr.to_bytes();
    let mut ip = [0u8; IPV4_HEADER_LEN];
    ip.copy_from_slice(&bytes[ETH_HEADER_LEN..ETH_HEADER_LEN + IPV4_HEADER_LEN]);
    let csum = ipv4_checksum(&ip);
    ip[10..12].copy_from_slice(&csum.to_be_bytes());

    let mut frame = Vec::with_capacity(ETH_HEADER_LEN + IPV4_HEADER_LEN + l4.len());
    frame.extend_from_slice(&bytes[..ETH_HEADER_LEN]);
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(l4);
    frame
}

/// Complete Ethernet/IPv4/UDP frame. The UDP checksum is left at zero,
/// which IPv4 allows.
pub fn build_udp_frame(src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) -> Vec<u8> {
    let mut udp = Vec::with_capacity(UDP_HEADER_LEN + payload.len());
    udp.extend_from_slice(&src.port().to_be_bytes());
    udp.extend_from_slice(&dst.port().to_be_bytes());
    udp.extend_from_slice(&((UDP_HEADER_LEN + payload.len()) as u16).to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(payload);

    build_ipv4_frame(Ipv4Header::UDP, *src.ip(), *dst.ip(), &udp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::layout::HEADER_LEN;

    #[test]
    fn udp_frame_parses_back() {
        let src = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 40000);
        let dst = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 9000);
        let frame = build_udp_frame(src, dst, b"hello");

        assert_eq!(frame.len(), HEADER_LEN + 5);
        let hdr = ParsedHeader::from_bytes(&frame);
        assert_eq!(hdr.is_ipv4(), Some(true));
        assert_eq!(hdr.is_udp(), Some(true));
        assert_eq!(hdr.ipv4.src, *src.ip());
        assert_eq!(hdr.udp.dst_port, 9000);
        assert_eq!(hdr.udp.length, 13);
        assert_eq!(hdr.ipv4.total_length, 33);
    }

    #[test]
    fn checksum_verifies_to_zero() {
        let frame = build_ipv4_frame(
            Ipv4Header::TCP,
            Ipv4Addr::new(1, 2, 3, 4),
            Ipv4Addr::new(5, 6, 7, 8),
            &[0u8; 20],
        );
        let ip = &frame[ETH_HEADER_LEN..ETH_HEADER_LEN + IPV4_HEADER_LEN];
        assert_eq!(ipv4_checksum(ip), 0);
    }

    #[test]
    fn encapsulation_sets_ethertype_from_version() {
        let v4 = ethernet_encapsulate(&[0x45, 0, 0, 20]);
        assert_eq!(&v4[12..14], &[0x08, 0x00]);
        assert_eq!(v4.len(), ETH_HEADER_LEN + 4);

        let v6 = ethernet_encapsulate(&[0x60, 0, 0, 0]);
        assert_eq!(&v6[12..14], &[0, 0]);

        let empty = ethernet_encapsulate(&[]);
        assert_eq!(empty.len(), ETH_HEADER_LEN);
    }
}

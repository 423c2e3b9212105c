use std::net::Ipv4Addr;

use crate::config::KeyEndpoint;
use crate::header::layout::{FIELD_TABLE, HEADER_LEN, HeaderField};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub ether_type: u16,
}

impl EthernetHeader {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8,
    pub dscp_ecn: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

impl Default for Ipv4Header {
    fn default() -> Self {
        Self {
            version: 0,
            ihl: 0,
            dscp_ecn: 0,
            total_length: 0,
            identification: 0,
            flags: 0,
            fragment_offset: 0,
            ttl: 0,
            protocol: 0,
            checksum: 0,
            src: Ipv4Addr::UNSPECIFIED,
            dst: Ipv4Addr::UNSPECIFIED,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
}

/// Ethernet/IPv4/UDP header of the packet in flight.
///
/// Fields are filled one at a time as their bytes arrive. Anything not
/// yet populated reads as zero, so the predicates below report `None`
/// until the fields they depend on are known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHeader {
    pub eth: EthernetHeader,
    pub ipv4: Ipv4Header,
    pub udp: UdpHeader,
    populated: u32,
}

impl ParsedHeader {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_populated(&self, field: HeaderField) -> bool {
        self.populated & field.bit() != 0
    }

    pub fn is_complete(&self) -> bool {
        FIELD_TABLE.iter().all(|span| self.is_populated(span.field))
    }

    /// `None` until the ethertype has arrived.
    pub fn is_ipv4(&self) -> Option<bool> {
        self.is_populated(HeaderField::EthType)
            .then_some(self.eth.ether_type == EthernetHeader::IPV4)
    }

    /// `None` until the IP protocol byte has arrived.
    pub fn is_udp(&self) -> Option<bool> {
        self.is_populated(HeaderField::IpProtocol)
            .then_some(self.ipv4.protocol == Ipv4Header::UDP)
    }

    /// Address and port used for the rule lookup, once both are known.
    pub fn lookup_key(&self, endpoint: KeyEndpoint) -> Option<(Ipv4Addr, u16)> {
        let (addr, port) = match endpoint {
            KeyEndpoint::Destination => (HeaderField::IpDst, HeaderField::UdpDstPort),
            KeyEndpoint::Source => (HeaderField::IpSrc, HeaderField::UdpSrcPort),
        };
        if !self.is_populated(addr) || !self.is_populated(port) {
            return None;
        }
        Some(match endpoint {
            KeyEndpoint::Destination => (self.ipv4.dst, self.udp.dst_port),
            KeyEndpoint::Source => (self.ipv4.src, self.udp.src_port),
        })
    }

    /// Decode one field from its network-order bytes and mark it populated.
    /// `bytes` must be exactly as long as the field's span.
    pub fn set_field(&mut self, field: HeaderField, bytes: &[u8]) {
        match field {
            HeaderField::EthDst => self.eth.dst_mac.copy_from_slice(bytes),
            HeaderField::EthSrc => self.eth.src_mac.copy_from_slice(bytes),
            HeaderField::EthType => self.eth.ether_type = be16(bytes),
            HeaderField::IpVersionIhl => {
                self.ipv4.version = bytes[0] >> 4;
                self.ipv4.ihl = bytes[0] & 0x0F;
            }
            HeaderField::IpDscpEcn => self.ipv4.dscp_ecn = bytes[0],
            HeaderField::IpTotalLength => self.ipv4.total_length = be16(bytes),
            HeaderField::IpIdentification => self.ipv4.identification = be16(bytes),
            HeaderField::IpFlagsFragment => {
                let raw = be16(bytes);
                self.ipv4.flags = (raw >> 13) as u8;
                self.ipv4.fragment_offset = raw & 0x1FFF;
            }
            HeaderField::IpTtl => self.ipv4.ttl = bytes[0],
            HeaderField::IpProtocol => self.ipv4.protocol = bytes[0],
            HeaderField::IpChecksum => self.ipv4.checksum = be16(bytes),
            HeaderField::IpSrc => self.ipv4.src = be_addr(bytes),
            HeaderField::IpDst => self.ipv4.dst = be_addr(bytes),
            HeaderField::UdpSrcPort => self.udp.src_port = be16(bytes),
            HeaderField::UdpDstPort => self.udp.dst_port = be16(bytes),
            HeaderField::UdpLength => self.udp.length = be16(bytes),
            HeaderField::UdpChecksum => self.udp.checksum = be16(bytes),
        }
        self.populated |= field.bit();
    }

    /// Encode one field into `out`, which must match the field's span.
    pub fn write_field(&self, field: HeaderField, out: &mut [u8]) {
        match field {
            HeaderField::EthDst => out.copy_from_slice(&self.eth.dst_mac),
            HeaderField::EthSrc => out.copy_from_slice(&self.eth.src_mac),
            HeaderField::EthType => out.copy_from_slice(&self.eth.ether_type.to_be_bytes()),
            HeaderField::IpVersionIhl => out[0] = (self.ipv4.version << 4) | (self.ipv4.ihl & 0x0F),
            HeaderField::IpDscpEcn => out[0] = self.ipv4.dscp_ecn,
            HeaderField::IpTotalLength => {
                out.copy_from_slice(&self.ipv4.total_length.to_be_bytes())
            }
            HeaderField::IpIdentification => {
                out.copy_from_slice(&self.ipv4.identification.to_be_bytes())
            }
            HeaderField::IpFlagsFragment => {
                let raw = ((self.ipv4.flags as u16) << 13) | (self.ipv4.fragment_offset & 0x1FFF);
                out.copy_from_slice(&raw.to_be_bytes());
            }
            HeaderField::IpTtl => out[0] = self.ipv4.ttl,
            HeaderField::IpProtocol => out[0] = self.ipv4.protocol,
            HeaderField::IpChecksum => out.copy_from_slice(&self.ipv4.checksum.to_be_bytes()),
            HeaderField::IpSrc => out.copy_from_slice(&self.ipv4.src.octets()),
            HeaderField::IpDst => out.copy_from_slice(&self.ipv4.dst.octets()),
            HeaderField::UdpSrcPort => out.copy_from_slice(&self.udp.src_port.to_be_bytes()),
            HeaderField::UdpDstPort => out.copy_from_slice(&self.udp.dst_port.to_be_bytes()),
            HeaderField::UdpLength => out.copy_from_slice(&self.udp.length.to_be_bytes()),
            HeaderField::UdpChecksum => out.copy_from_slice(&self.udp.checksum.to_be_bytes()),
        }
    }

    /// Wire image of all three headers.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        for span in FIELD_TABLE.iter() {
            self.write_field(span.field, &mut out[span.bytes()]);
        }
        out
    }

    /// Parse a contiguous frame prefix in one go. Fields cut off by a
    /// short buffer stay unset.
    pub fn from_bytes(frame: &[u8]) -> Self {
        let mut hdr = Self::default();
        for span in FIELD_TABLE.iter() {
            if let Some(bytes) = frame.get(span.bytes()) {
                hdr.set_field(span.field, bytes);
            }
        }
        hdr
    }
}

fn be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_addr(bytes: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_are_undetermined_before_fields_arrive() {
        let hdr = ParsedHeader::default();
        assert_eq!(hdr.is_ipv4(), None);
        assert_eq!(hdr.is_udp(), None);
        assert_eq!(hdr.lookup_key(KeyEndpoint::Destination), None);
    }

    #[test]
    fn set_field_decodes_network_order() {
        let mut hdr = ParsedHeader::default();
        hdr.set_field(HeaderField::EthType, &[0x08, 0x00]);
        hdr.set_field(HeaderField::IpProtocol, &[17]);
        hdr.set_field(HeaderField::IpDst, &[10, 0, 0, 5]);
        hdr.set_field(HeaderField::UdpDstPort, &9000u16.to_be_bytes());
        hdr.set_field(HeaderField::IpFlagsFragment, &[0x40, 0x00]);

        assert_eq!(hdr.is_ipv4(), Some(true));
        assert_eq!(hdr.is_udp(), Some(true));
        assert_eq!(hdr.ipv4.flags, 0b010);
        assert_eq!(
            hdr.lookup_key(KeyEndpoint::Destination),
            Some((Ipv4Addr::new(10, 0, 0, 5), 9000))
        );
        assert_eq!(hdr.lookup_key(KeyEndpoint::Source), None);
    }

    #[test]
    fn tcp_protocol_is_known_not_udp() {
        let mut hdr = ParsedHeader::default();
        hdr.set_field(HeaderField::IpProtocol, &[Ipv4Header::TCP]);
        assert_eq!(hdr.is_udp(), Some(false));
    }

    #[test]
    fn short_buffer_leaves_tail_fields_unset() {
        let mut full = ParsedHeader::default();
        full.eth.ether_type = EthernetHeader::IPV4;
        full.ipv4.protocol = Ipv4Header::UDP;
        full.ipv4.dst = Ipv4Addr::new(192, 168, 1, 1);
        let bytes = full.to_bytes();

        let partial = ParsedHeader::from_bytes(&bytes[..30]);
        assert_eq!(partial.is_ipv4(), Some(true));
        assert_eq!(partial.is_udp(), Some(true));
        assert!(!partial.is_populated(HeaderField::IpDst));
        assert!(!partial.is_complete());

        let whole = ParsedHeader::from_bytes(&bytes);
        assert!(whole.is_complete());
        assert_eq!(whole.ipv4.dst, full.ipv4.dst);
    }
}

mod frame;
mod layout;
mod parsed;
mod reconstructor;

pub use frame::{build_ipv4_frame, build_udp_frame, ethernet_encapsulate, ipv4_checksum};
pub use layout::{
    ETH_HEADER_LEN, FIELD_TABLE, FieldSpan, HEADER_LEN, HeaderField, HeaderLayout,
    IPV4_HEADER_LEN, UDP_HEADER_LEN,
};
pub use parsed::{EthernetHeader, Ipv4Header, ParsedHeader, UdpHeader};
pub use reconstructor::HeaderReconstructor;

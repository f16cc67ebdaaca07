use std::fmt;

use crate::checksum;
use crate::layout::{FieldRole, HeaderLayout, IpFamily};
use crate::link::MacAddr;

/// Length of an Ethernet II header.
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Which builder produced a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatagramKind {
    Icmpv4Echo,
    Icmpv6Echo,
    MldQuery,
    IgmpQuery,
    Icmpv4Redirect,
    NeighborAdvert,
    Icmpv6Redirect,
}

impl DatagramKind {
    pub fn family(self) -> IpFamily {
        match self {
            DatagramKind::Icmpv4Echo | DatagramKind::IgmpQuery | DatagramKind::Icmpv4Redirect => {
                IpFamily::V4
            }
            DatagramKind::Icmpv6Echo
            | DatagramKind::MldQuery
            | DatagramKind::NeighborAdvert
            | DatagramKind::Icmpv6Redirect => IpFamily::V6,
        }
    }
}

impl fmt::Display for DatagramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatagramKind::Icmpv4Echo => write!(f, "icmpv4-echo"),
            DatagramKind::Icmpv6Echo => write!(f, "icmpv6-echo"),
            DatagramKind::MldQuery => write!(f, "mldv2-query"),
            DatagramKind::IgmpQuery => write!(f, "igmpv3-query"),
            DatagramKind::Icmpv4Redirect => write!(f, "icmpv4-redirect"),
            DatagramKind::NeighborAdvert => write!(f, "neighbor-advert"),
            DatagramKind::Icmpv6Redirect => write!(f, "icmpv6-redirect"),
        }
    }
}

/// A complete network-layer packet, optionally preceded by a link header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    kind: DatagramKind,
    bytes: Vec<u8>,
    network_offset: usize,
    ip_header_len: usize,
}

impl Datagram {
    pub(crate) fn new(kind: DatagramKind, bytes: Vec<u8>, ip_header_len: usize) -> Self {
        Self {
            kind,
            bytes,
            network_offset: 0,
            ip_header_len,
        }
    }

    pub fn kind(&self) -> DatagramKind {
        self.kind
    }

    pub fn family(&self) -> IpFamily {
        self.kind.family()
    }

    pub fn layout(&self) -> &'static HeaderLayout {
        HeaderLayout::for_family(self.family())
    }

    /// Full buffer, link header included when present.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Length of the fixed IP header as built (options included for IPv4,
    /// extension headers excluded for IPv6).
    pub fn ip_header_len(&self) -> usize {
        self.ip_header_len
    }

    /// The network-layer packet without any link header.
    pub fn network_bytes(&self) -> &[u8] {
        &self.bytes[self.network_offset..]
    }

    pub fn header(&self) -> &[u8] {
        &self.bytes[self.network_offset..self.network_offset + self.ip_header_len]
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        let start = self.network_offset;
        &mut self.bytes[start..start + self.ip_header_len]
    }

    /// Bytes following the IP header (extension headers included for IPv6).
    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.network_offset + self.ip_header_len..]
    }

    /// Read a header field by role; wide fields return their first word.
    pub fn field(&self, role: FieldRole) -> Option<u32> {
        self.layout()
            .field(role)
            .map(|desc| desc.word(0).read(self.header()))
    }

    /// Recompute and store the IPv4 header checksum over the header as it
    /// currently stands. Returns the stored value; IPv6 has no header
    /// checksum and yields `None`.
    pub fn refresh_header_checksum(&mut self) -> Option<u16> {
        let desc = self.layout().checksum?;
        let header = self.header_mut();
        checksum::store(header, desc.offset);
        Some(desc.read(header) as u16)
    }

    /// Prepend an Ethernet II header for link-layer injection.
    pub fn with_ethernet(mut self, source: MacAddr, destination: MacAddr) -> Self {
        let eth = etherparse::Ethernet2Header {
            source: source.octets(),
            destination: destination.octets(),
            ether_type: etherparse::EtherType(self.family().ethertype()),
        };
        let mut framed = Vec::with_capacity(ETHERNET_HEADER_LEN + self.bytes.len());
        framed.extend_from_slice(&eth.to_bytes());
        framed.extend_from_slice(&self.bytes[self.network_offset..]);
        self.bytes = framed;
        self.network_offset = ETHERNET_HEADER_LEN;
        self
    }
}

impl AsRef<[u8]> for Datagram {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

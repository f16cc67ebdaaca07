//! Datagram builders.
//!
//! Each parameter record implements [`DatagramBuilder`] and produces a
//! complete, checksummed packet. Sizes are validated at the boundary with the
//! `check_*` helpers; builders assume valid input.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::checksum::{self, pseudo_checksum};
use crate::datagram::{Datagram, DatagramKind};
use crate::layout::{IPV4_FLAG_DONT_FRAGMENT, IPV4_HEADER_LEN, IPV6_HEADER_LEN};
use crate::payload;
use crate::privilege::PacketError;

/// Largest network-layer packet that fits a standard Ethernet frame.
pub const ETHERNET_MTU: usize = 1500;

pub const ICMP_HEADER_LEN: usize = 8;
pub const ICMPV4_DATA_MAX: usize = ETHERNET_MTU - IPV4_HEADER_LEN - ICMP_HEADER_LEN;
pub const ICMPV6_DATA_MAX: usize = ETHERNET_MTU - IPV6_HEADER_LEN - ICMP_HEADER_LEN;

/// Hop-by-Hop header carrying Router Alert + PadN.
pub const HOP_BY_HOP_LEN: usize = 8;
pub const MLDV2_QUERY_BASE_LEN: usize = 28;
pub const MLDV2_SOURCES_MAX: usize =
    (ETHERNET_MTU - IPV6_HEADER_LEN - HOP_BY_HOP_LEN - MLDV2_QUERY_BASE_LEN) / 16;

/// IPv4 Router Alert option (RFC 2113).
pub const IPV4_ROUTER_ALERT_LEN: usize = 4;
pub const IGMPV3_QUERY_BASE_LEN: usize = 12;
pub const IGMPV3_SOURCES_MAX: usize =
    (ETHERNET_MTU - IPV4_HEADER_LEN - IPV4_ROUTER_ALERT_LEN - IGMPV3_QUERY_BASE_LEN) / 4;

pub const DEFAULT_TTL: u8 = 64;
pub const DEFAULT_HOP_LIMIT: u8 = 64;
pub const IPV4_PACKET_ID: u16 = 0xFFFF;
pub const ECHO_IDENTIFIER: u16 = 0xFFFF;
pub const ECHO_SEQUENCE: u16 = 1;
/// Maximum Response Code defaults: 10 s for both MLD (ms) and IGMP (1/10 s).
pub const MLD_DEFAULT_MAX_RESPONSE: u16 = 10_000;
pub const IGMP_DEFAULT_MAX_RESPONSE: u8 = 100;

pub const IPPROTO_HOPOPTS: u8 = 0;
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_IGMP: u8 = 2;
pub const IPPROTO_ICMPV6: u8 = 58;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const MLD_LISTENER_QUERY: u8 = 130;
const IGMP_MEMBERSHIP_QUERY: u8 = 0x11;

pub const IPV6_ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
pub const IPV4_ALL_SYSTEMS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);

/// Common interface for every protocol builder.
pub trait DatagramBuilder {
    fn build(&self) -> Datagram;
}

// ---------------------------------------------------------------------------
// Boundary validation
// ---------------------------------------------------------------------------

pub fn check_icmpv4_payload(size: usize) -> Result<(), PacketError> {
    check_max("ICMPv4 data size", size, ICMPV4_DATA_MAX)
}

pub fn check_icmpv6_payload(size: usize) -> Result<(), PacketError> {
    check_max("ICMPv6 data size", size, ICMPV6_DATA_MAX)
}

pub fn check_mld_sources(count: usize) -> Result<(), PacketError> {
    check_max("number of MLDv2 sources", count, MLDV2_SOURCES_MAX)
}

pub fn check_igmp_sources(count: usize) -> Result<(), PacketError> {
    check_max("number of IGMPv3 sources", count, IGMPV3_SOURCES_MAX)
}

fn check_max(what: &str, value: usize, max: usize) -> Result<(), PacketError> {
    if value > max {
        return Err(PacketError::InvalidConfig(format!(
            "{what} should be less than {} (got {value})",
            max + 1
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Network headers
// ---------------------------------------------------------------------------

pub(crate) struct Ipv4Fields<'a> {
    pub tos: u8,
    pub total_len: usize,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub options: &'a [u8],
}

/// Write an IPv4 header (options included) and its checksum into `buf`.
pub(crate) fn write_ipv4_header(buf: &mut [u8], f: &Ipv4Fields<'_>) -> usize {
    let header_len = IPV4_HEADER_LEN + f.options.len();
    debug_assert!(header_len % 4 == 0);
    buf[0] = 0x40 | (header_len / 4) as u8;
    buf[1] = f.tos;
    buf[2..4].copy_from_slice(&(f.total_len as u16).to_be_bytes());
    buf[4..6].copy_from_slice(&IPV4_PACKET_ID.to_be_bytes());
    buf[6..8].copy_from_slice(&IPV4_FLAG_DONT_FRAGMENT.to_be_bytes());
    buf[8] = f.ttl;
    buf[9] = f.protocol;
    buf[12..16].copy_from_slice(&f.src.octets());
    buf[16..20].copy_from_slice(&f.dst.octets());
    buf[IPV4_HEADER_LEN..header_len].copy_from_slice(f.options);
    checksum::store(&mut buf[..header_len], 10);
    header_len
}

pub(crate) fn write_ipv6_header(
    buf: &mut [u8],
    payload_len: usize,
    next_header: u8,
    hop_limit: u8,
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
) {
    // Version 6, traffic class and flow label zero.
    buf[0..4].copy_from_slice(&[0x60, 0, 0, 0]);
    buf[4..6].copy_from_slice(&(payload_len as u16).to_be_bytes());
    buf[6] = next_header;
    buf[7] = hop_limit;
    buf[8..24].copy_from_slice(&src.octets());
    buf[24..40].copy_from_slice(&dst.octets());
}

fn write_echo_header(icmp: &mut [u8], icmp_type: u8, identifier: u16, sequence: u16) {
    icmp[0] = icmp_type;
    icmp[1] = 0;
    icmp[2..4].fill(0);
    icmp[4..6].copy_from_slice(&identifier.to_be_bytes());
    icmp[6..8].copy_from_slice(&sequence.to_be_bytes());
}

// ---------------------------------------------------------------------------
// IPv4 + ICMP echo request
// ---------------------------------------------------------------------------

/// IPv4 ICMP echo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmpv4Echo {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Echo data bytes after the ICMP header (at most [`ICMPV4_DATA_MAX`]).
    pub payload_size: usize,
    pub identifier: u16,
    pub sequence: u16,
    pub ttl: u8,
}

impl Icmpv4Echo {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, payload_size: usize) -> Self {
        Self {
            src,
            dst,
            payload_size,
            identifier: ECHO_IDENTIFIER,
            sequence: ECHO_SEQUENCE,
            ttl: DEFAULT_TTL,
        }
    }
}

impl DatagramBuilder for Icmpv4Echo {
    fn build(&self) -> Datagram {
        debug_assert!(self.payload_size <= ICMPV4_DATA_MAX);
        let total_len = IPV4_HEADER_LEN + ICMP_HEADER_LEN + self.payload_size;
        let mut buf = vec![0u8; total_len];

        let header_len = write_ipv4_header(
            &mut buf,
            &Ipv4Fields {
                tos: 0,
                total_len,
                ttl: self.ttl,
                protocol: IPPROTO_ICMP,
                src: self.src,
                dst: self.dst,
                options: &[],
            },
        );

        // ICMPv4 has no pseudo-header: checksum covers header + data only.
        let icmp = &mut buf[header_len..];
        write_echo_header(icmp, ICMP_ECHO_REQUEST, self.identifier, self.sequence);
        payload::fill(&mut icmp[ICMP_HEADER_LEN..], self.payload_size);
        checksum::store(icmp, 2);

        Datagram::new(DatagramKind::Icmpv4Echo, buf, header_len)
    }
}

// ---------------------------------------------------------------------------
// IPv6 + ICMPv6 echo request
// ---------------------------------------------------------------------------

/// IPv6 ICMPv6 echo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmpv6Echo {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    /// Echo data bytes after the ICMPv6 header (at most [`ICMPV6_DATA_MAX`]).
    pub payload_size: usize,
    pub identifier: u16,
    pub sequence: u16,
    pub hop_limit: u8,
}

impl Icmpv6Echo {
    pub fn new(src: Ipv6Addr, dst: Ipv6Addr, payload_size: usize) -> Self {
        Self {
            src,
            dst,
            payload_size,
            identifier: ECHO_IDENTIFIER,
            sequence: ECHO_SEQUENCE,
            hop_limit: DEFAULT_HOP_LIMIT,
        }
    }
}

impl DatagramBuilder for Icmpv6Echo {
    fn build(&self) -> Datagram {
        debug_assert!(self.payload_size <= ICMPV6_DATA_MAX);
        let icmp_len = ICMP_HEADER_LEN + self.payload_size;
        let mut buf = vec![0u8; IPV6_HEADER_LEN + icmp_len];

        write_ipv6_header(
            &mut buf,
            icmp_len,
            IPPROTO_ICMPV6,
            self.hop_limit,
            &self.src,
            &self.dst,
        );

        let icmp = &mut buf[IPV6_HEADER_LEN..];
        write_echo_header(icmp, ICMPV6_ECHO_REQUEST, self.identifier, self.sequence);
        payload::fill(&mut icmp[ICMP_HEADER_LEN..], self.payload_size);
        let cksum = pseudo_checksum(&self.src, &self.dst, icmp_len as u32, IPPROTO_ICMPV6, icmp);
        icmp[2..4].copy_from_slice(&cksum.to_be_bytes());

        Datagram::new(DatagramKind::Icmpv6Echo, buf, IPV6_HEADER_LEN)
    }
}

// ---------------------------------------------------------------------------
// IPv6 + Hop-by-Hop + MLDv2 query
// ---------------------------------------------------------------------------

/// MLDv2 listener query (RFC 3810).
///
/// A query sent to the all-nodes address is a general query and carries the
/// unspecified address; any other destination is queried as the group itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MldQuery {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    /// Maximum Response Code in milliseconds.
    pub max_response: u16,
    /// Querier's Robustness Variable (3 bits).
    pub robustness: u8,
    /// Querier's Query Interval Code.
    pub query_interval_code: u8,
    pub sources: Vec<Ipv6Addr>,
}

impl MldQuery {
    /// General query towards all nodes.
    pub fn general(src: Ipv6Addr) -> Self {
        Self {
            src,
            dst: IPV6_ALL_NODES,
            max_response: MLD_DEFAULT_MAX_RESPONSE,
            robustness: 0,
            query_interval_code: 0,
            sources: Vec::new(),
        }
    }

    /// Group (and source) specific query addressed to `group`.
    pub fn for_group(src: Ipv6Addr, group: Ipv6Addr, sources: Vec<Ipv6Addr>) -> Self {
        Self {
            dst: group,
            sources,
            ..Self::general(src)
        }
    }

    /// Value of the query's Multicast Address field.
    pub fn group(&self) -> Ipv6Addr {
        if self.dst == IPV6_ALL_NODES {
            Ipv6Addr::UNSPECIFIED
        } else {
            self.dst
        }
    }

    /// Size of the MLD message itself (no Hop-by-Hop header).
    pub fn query_len(&self) -> usize {
        MLDV2_QUERY_BASE_LEN + self.sources.len() * 16
    }

    /// The checksummed MLDv2 query message.
    pub fn message(&self) -> Vec<u8> {
        debug_assert!(self.sources.len() <= MLDV2_SOURCES_MAX);
        let len = self.query_len();
        let mut msg = vec![0u8; len];
        msg[0] = MLD_LISTENER_QUERY;
        msg[1] = 0;
        msg[4..6].copy_from_slice(&self.max_response.to_be_bytes());
        // bytes 6..8 reserved
        msg[8..24].copy_from_slice(&self.group().octets());
        msg[24] = self.robustness & 0x07;
        msg[25] = self.query_interval_code;
        msg[26..28].copy_from_slice(&(self.sources.len() as u16).to_be_bytes());
        for (slot, source) in msg[MLDV2_QUERY_BASE_LEN..]
            .chunks_exact_mut(16)
            .zip(&self.sources)
        {
            slot.copy_from_slice(&source.octets());
        }

        // Pseudo-header length is the query's own size, not the IPv6 payload
        // length, because the Hop-by-Hop header precedes it.
        let cksum = pseudo_checksum(&self.src, &self.dst, len as u32, IPPROTO_ICMPV6, &msg);
        msg[2..4].copy_from_slice(&cksum.to_be_bytes());
        msg
    }
}

impl DatagramBuilder for MldQuery {
    fn build(&self) -> Datagram {
        let query = self.message();
        let payload_len = HOP_BY_HOP_LEN + query.len();
        let mut buf = Vec::with_capacity(IPV6_HEADER_LEN + payload_len);
        buf.resize(IPV6_HEADER_LEN, 0);

        write_ipv6_header(&mut buf, payload_len, IPPROTO_HOPOPTS, 1, &self.src, &self.dst);

        // Hop-by-Hop: next header, length 0 (8 octets), Router Alert (MLD),
        // then a 2-octet PadN to reach the 8-octet boundary.
        buf.extend_from_slice(&[IPPROTO_ICMPV6, 0, 0x05, 0x02, 0x00, 0x00, 0x01, 0x00]);
        buf.extend_from_slice(&query);

        Datagram::new(DatagramKind::MldQuery, buf, IPV6_HEADER_LEN)
    }
}

// ---------------------------------------------------------------------------
// IPv4 + IGMPv3 query
// ---------------------------------------------------------------------------

/// IGMPv3 membership query (RFC 3376).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgmpQuery {
    pub src: Ipv4Addr,
    /// Queried group; `None` makes a general query.
    pub group: Option<Ipv4Addr>,
    /// Maximum Response Code in tenths of a second.
    pub max_response: u8,
    pub robustness: u8,
    pub query_interval_code: u8,
    pub sources: Vec<Ipv4Addr>,
}

impl IgmpQuery {
    pub fn general(src: Ipv4Addr) -> Self {
        Self {
            src,
            group: None,
            max_response: IGMP_DEFAULT_MAX_RESPONSE,
            robustness: 0,
            query_interval_code: 0,
            sources: Vec::new(),
        }
    }

    pub fn for_group(src: Ipv4Addr, group: Ipv4Addr, sources: Vec<Ipv4Addr>) -> Self {
        Self {
            group: Some(group),
            sources,
            ..Self::general(src)
        }
    }

    /// IP destination: the group itself, or all-systems for a general query.
    pub fn destination(&self) -> Ipv4Addr {
        self.group.unwrap_or(IPV4_ALL_SYSTEMS)
    }

    pub fn query_len(&self) -> usize {
        IGMPV3_QUERY_BASE_LEN + self.sources.len() * 4
    }

    /// The checksummed IGMPv3 query message (`12 + 4n` bytes).
    pub fn message(&self) -> Vec<u8> {
        debug_assert!(self.sources.len() <= IGMPV3_SOURCES_MAX);
        let mut msg = vec![0u8; self.query_len()];
        msg[0] = IGMP_MEMBERSHIP_QUERY;
        msg[1] = self.max_response;
        msg[4..8].copy_from_slice(&self.group.unwrap_or(Ipv4Addr::UNSPECIFIED).octets());
        msg[8] = self.robustness & 0x07;
        msg[9] = self.query_interval_code;
        msg[10..12].copy_from_slice(&(self.sources.len() as u16).to_be_bytes());
        for (slot, source) in msg[IGMPV3_QUERY_BASE_LEN..]
            .chunks_exact_mut(4)
            .zip(&self.sources)
        {
            slot.copy_from_slice(&source.octets());
        }
        checksum::store(&mut msg, 2);
        msg
    }
}

impl DatagramBuilder for IgmpQuery {
    fn build(&self) -> Datagram {
        let msg = self.message();
        let header_len = IPV4_HEADER_LEN + IPV4_ROUTER_ALERT_LEN;
        let total_len = header_len + msg.len();
        let mut buf = vec![0u8; total_len];

        write_ipv4_header(
            &mut buf,
            &Ipv4Fields {
                tos: 0xC0,
                total_len,
                ttl: 1,
                protocol: IPPROTO_IGMP,
                src: self.src,
                dst: self.destination(),
                options: &[0x94, 0x04, 0x00, 0x00],
            },
        );
        buf[header_len..].copy_from_slice(&msg);

        Datagram::new(DatagramKind::IgmpQuery, buf, header_len)
    }
}

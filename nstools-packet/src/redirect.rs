//! Rogue gateway: answers address resolution for a made-up router and then
//! tells every host that sends through it to use another next hop.
//!
//! [`Redirector`] consumes captured Ethernet frames and returns the frame to
//! inject in response, if any:
//!
//! - ARP request: reply with a fresh gateway MAC for the requested address.
//! - Neighbor Solicitation: Neighbor Advertisement with a fresh gateway MAC.
//! - IPv4 sent to the gateway MAC: ICMP host redirect.
//! - ICMPv6 echo request or UDP sent to the gateway MAC: ND redirect.
//!
//! Each ARP or NS exchange announces a new gateway. Traffic addressed to the
//! announced MAC adopts it; traffic to the previously adopted MAC keeps being
//! redirected until then.

use std::net::{Ipv4Addr, Ipv6Addr};

use etherparse::{EtherType, Ethernet2HeaderSlice, IpNumber, Ipv4HeaderSlice, Ipv6HeaderSlice};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::build::{
    DEFAULT_TTL, DatagramBuilder, ETHERNET_MTU, ICMP_HEADER_LEN, ICMPV4_DATA_MAX, IPPROTO_ICMP,
    IPPROTO_ICMPV6, Ipv4Fields, write_ipv4_header, write_ipv6_header,
};
use crate::checksum::{self, pseudo_checksum};
use crate::datagram::{Datagram, DatagramKind, ETHERNET_HEADER_LEN};
use crate::layout::{IPV4_HEADER_LEN, IPV6_HEADER_LEN};
use crate::link::MacAddr;

pub const ARP_PACKET_LEN: usize = 28;
/// Neighbor Advertisement with a Target Link-Layer Address option.
pub const NEIGHBOR_ADVERT_LEN: usize = 32;
/// Redirect message up to and including the Destination Address.
pub const ND_REDIRECT_BASE_LEN: usize = 40;
/// Largest Redirected Header option that keeps the packet within the MTU,
/// rounded down to the 8-byte option unit.
pub const REDIRECTED_HEADER_MAX: usize =
    (ETHERNET_MTU - IPV6_HEADER_LEN - ND_REDIRECT_BASE_LEN) / 8 * 8;

/// ND messages must arrive with hop limit 255 (RFC 4861).
pub const ND_HOP_LIMIT: u8 = 255;

const ICMP_REDIRECT: u8 = 5;
const ICMP_REDIRECT_HOST: u8 = 1;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ND_NEIGHBOR_SOLICIT: u8 = 135;
const ND_NEIGHBOR_ADVERT: u8 = 136;
const ND_REDIRECT: u8 = 137;
const ND_OPT_SOURCE_LINKADDR: u8 = 1;
const ND_OPT_TARGET_LINKADDR: u8 = 2;
const ND_OPT_REDIRECTED_HEADER: u8 = 4;
/// Router, Solicited and Override.
const ND_NA_FLAGS: u32 = 0xE000_0000;

const ARP_HTYPE_ETHERNET: u16 = 1;
const ARP_OP_REQUEST: u16 = 1;
const ARP_OP_REPLY: u16 = 2;

/// IPv4 ICMP host redirect (type 5, code 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmpv4Redirect {
    /// The gateway issuing the redirect.
    pub src: Ipv4Addr,
    /// Sender of the offending datagram.
    pub dst: Ipv4Addr,
    /// Router the host should use instead.
    pub next_hop: Ipv4Addr,
    /// The offending IP datagram; truncated to [`ICMPV4_DATA_MAX`].
    pub original: Vec<u8>,
}

impl DatagramBuilder for Icmpv4Redirect {
    fn build(&self) -> Datagram {
        let data_len = self.original.len().min(ICMPV4_DATA_MAX);
        let total_len = IPV4_HEADER_LEN + ICMP_HEADER_LEN + data_len;
        let mut buf = vec![0u8; total_len];
        let header_len = write_ipv4_header(
            &mut buf,
            &Ipv4Fields {
                tos: 0,
                total_len,
                ttl: DEFAULT_TTL,
                protocol: IPPROTO_ICMP,
                src: self.src,
                dst: self.dst,
                options: &[],
            },
        );

        let icmp = &mut buf[header_len..];
        icmp[0] = ICMP_REDIRECT;
        icmp[1] = ICMP_REDIRECT_HOST;
        icmp[4..8].copy_from_slice(&self.next_hop.octets());
        icmp[ICMP_HEADER_LEN..].copy_from_slice(&self.original[..data_len]);
        checksum::store(icmp, 2);

        Datagram::new(DatagramKind::Icmpv4Redirect, buf, header_len)
    }
}

/// Solicited Neighbor Advertisement claiming `target` for `mac`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborAdvert {
    /// Advertised address; also the source of the packet.
    pub target: Ipv6Addr,
    /// Source of the solicitation.
    pub dst: Ipv6Addr,
    pub mac: MacAddr,
}

impl DatagramBuilder for NeighborAdvert {
    fn build(&self) -> Datagram {
        let mut buf = vec![0u8; IPV6_HEADER_LEN + NEIGHBOR_ADVERT_LEN];
        write_ipv6_header(
            &mut buf,
            NEIGHBOR_ADVERT_LEN,
            IPPROTO_ICMPV6,
            ND_HOP_LIMIT,
            &self.target,
            &self.dst,
        );

        let na = &mut buf[IPV6_HEADER_LEN..];
        na[0] = ND_NEIGHBOR_ADVERT;
        na[4..8].copy_from_slice(&ND_NA_FLAGS.to_be_bytes());
        na[8..24].copy_from_slice(&self.target.octets());
        na[24] = ND_OPT_TARGET_LINKADDR;
        na[25] = 1;
        na[26..32].copy_from_slice(&self.mac.octets());
        let cksum = pseudo_checksum(
            &self.target,
            &self.dst,
            NEIGHBOR_ADVERT_LEN as u32,
            IPPROTO_ICMPV6,
            na,
        );
        na[2..4].copy_from_slice(&cksum.to_be_bytes());

        Datagram::new(DatagramKind::NeighborAdvert, buf, IPV6_HEADER_LEN)
    }
}

/// ND Redirect (RFC 4861 section 4.5) with a Redirected Header option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmpv6Redirect {
    /// The gateway issuing the redirect.
    pub src: Ipv6Addr,
    /// Sender of the offending packet.
    pub dst: Ipv6Addr,
    /// Better first hop.
    pub target: Ipv6Addr,
    /// Destination of the offending packet.
    pub destination: Ipv6Addr,
    /// The offending IPv6 packet, as much as fits.
    pub original: Vec<u8>,
}

impl Icmpv6Redirect {
    /// Length of the Redirected Header option: 8-byte header plus the
    /// original packet, zero padded to a multiple of 8 and capped at
    /// [`REDIRECTED_HEADER_MAX`].
    pub fn option_len(&self) -> usize {
        (8 + self.original.len()).next_multiple_of(8).min(REDIRECTED_HEADER_MAX)
    }
}

impl DatagramBuilder for Icmpv6Redirect {
    fn build(&self) -> Datagram {
        let option_len = self.option_len();
        let payload_len = ND_REDIRECT_BASE_LEN + option_len;
        let mut buf = vec![0u8; IPV6_HEADER_LEN + payload_len];
        write_ipv6_header(
            &mut buf,
            payload_len,
            IPPROTO_ICMPV6,
            ND_HOP_LIMIT,
            &self.src,
            &self.dst,
        );

        let rd = &mut buf[IPV6_HEADER_LEN..];
        rd[0] = ND_REDIRECT;
        rd[8..24].copy_from_slice(&self.target.octets());
        rd[24..40].copy_from_slice(&self.destination.octets());

        let opt = &mut rd[ND_REDIRECT_BASE_LEN..];
        opt[0] = ND_OPT_REDIRECTED_HEADER;
        opt[1] = (option_len / 8) as u8;
        let copied = self.original.len().min(option_len - 8);
        opt[8..8 + copied].copy_from_slice(&self.original[..copied]);

        let cksum = pseudo_checksum(&self.src, &self.dst, payload_len as u32, IPPROTO_ICMPV6, rd);
        rd[2..4].copy_from_slice(&cksum.to_be_bytes());

        Datagram::new(DatagramKind::Icmpv6Redirect, buf, IPV6_HEADER_LEN)
    }
}

/// Ethernet ARP reply frame.
pub fn arp_reply_frame(
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let eth = etherparse::Ethernet2Header {
        source: sender_mac.octets(),
        destination: target_mac.octets(),
        ether_type: EtherType::ARP,
    };
    let mut frame = Vec::with_capacity(ETHERNET_HEADER_LEN + ARP_PACKET_LEN);
    frame.extend_from_slice(&eth.to_bytes());
    frame.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    frame.extend_from_slice(&EtherType::IPV4.0.to_be_bytes());
    frame.extend_from_slice(&[6, 4]);
    frame.extend_from_slice(&ARP_OP_REPLY.to_be_bytes());
    frame.extend_from_slice(&sender_mac.octets());
    frame.extend_from_slice(&sender_ip.octets());
    frame.extend_from_slice(&target_mac.octets());
    frame.extend_from_slice(&target_ip.octets());
    frame
}

/// Announced IPv4 gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Gateway {
    pub mac: MacAddr,
    pub addr: Ipv4Addr,
    pub next_hop: Ipv4Addr,
}

/// Announced IPv6 gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Gateway {
    pub mac: MacAddr,
    pub addr: Ipv6Addr,
    pub next_hop: Ipv6Addr,
}

trait HasMac {
    fn mac(&self) -> MacAddr;
}

impl HasMac for Ipv4Gateway {
    fn mac(&self) -> MacAddr {
        self.mac
    }
}

impl HasMac for Ipv6Gateway {
    fn mac(&self) -> MacAddr {
        self.mac
    }
}

/// Most recently announced gateway and the one hosts are using.
#[derive(Debug, Clone)]
struct GatewayState<G> {
    announced: Option<G>,
    active: Option<G>,
}

impl<G> Default for GatewayState<G> {
    fn default() -> Self {
        Self {
            announced: None,
            active: None,
        }
    }
}

impl<G: HasMac + Copy> GatewayState<G> {
    /// Gateway whose MAC a frame was sent to.
    fn select(&mut self, destination: MacAddr) -> Option<G> {
        if let Some(announced) = self.announced
            && announced.mac() == destination
        {
            self.active = Some(announced);
        }
        self.active.filter(|g| g.mac() == destination)
    }
}

/// Which reply a frame produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    ArpReply,
    NeighborAdvert,
    Icmpv4Redirect,
    Icmpv6Redirect,
}

/// A frame to inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub frame: Vec<u8>,
}

/// Gateway impersonation state machine.
#[derive(Debug, Clone)]
pub struct Redirector {
    rng: StdRng,
    v4: GatewayState<Ipv4Gateway>,
    v6: GatewayState<Ipv6Gateway>,
}

impl Redirector {
    pub fn from_process_id() -> Self {
        Self::with_seed(u64::from(std::process::id()))
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            v4: GatewayState::default(),
            v6: GatewayState::default(),
        }
    }

    pub fn ipv4_gateway(&self) -> Option<&Ipv4Gateway> {
        self.v4.announced.as_ref()
    }

    pub fn ipv6_gateway(&self) -> Option<&Ipv6Gateway> {
        self.v6.announced.as_ref()
    }

    /// React to one captured Ethernet frame.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Option<Reply> {
        let eth = Ethernet2HeaderSlice::from_slice(frame).ok()?;
        let source = MacAddr::new(eth.source());
        let destination = MacAddr::new(eth.destination());
        let payload = &frame[ETHERNET_HEADER_LEN..];
        match eth.ether_type() {
            EtherType::ARP => self.arp(source, payload),
            EtherType::IPV4 => self.ipv4(source, destination, payload),
            EtherType::IPV6 => self.ipv6(source, destination, payload),
            _ => None,
        }
    }

    fn arp(&mut self, source: MacAddr, arp: &[u8]) -> Option<Reply> {
        if arp.len() < ARP_PACKET_LEN
            || u16::from_be_bytes([arp[0], arp[1]]) != ARP_HTYPE_ETHERNET
            || u16::from_be_bytes([arp[2], arp[3]]) != EtherType::IPV4.0
            || arp[4] != 6
            || arp[5] != 4
        {
            return None;
        }
        let op = u16::from_be_bytes([arp[6], arp[7]]);
        if op != ARP_OP_REQUEST {
            trace!(op, "ignoring ARP that is not a request");
            return None;
        }
        let requester_mac = MacAddr::new([arp[8], arp[9], arp[10], arp[11], arp[12], arp[13]]);
        let requester_ip = Ipv4Addr::new(arp[14], arp[15], arp[16], arp[17]);
        let wanted = Ipv4Addr::new(arp[24], arp[25], arp[26], arp[27]);

        let previous = self.v4.announced;
        let gateway = Ipv4Gateway {
            mac: self.fresh_mac(previous.map(|g| g.mac)),
            addr: wanted,
            next_hop: self.fresh_ipv4_next_hop(wanted, previous.map(|g| g.next_hop)),
        };
        self.v4.announced = Some(gateway);
        debug!(
            gateway = %gateway.addr,
            mac = %gateway.mac,
            next_hop = %gateway.next_hop,
            requester = %requester_ip,
            "answering ARP request"
        );
        let mut frame = arp_reply_frame(gateway.mac, gateway.addr, requester_mac, requester_ip);
        // Ethernet destination is the frame source, which may differ from the ARP sender.
        frame[..6].copy_from_slice(&source.octets());
        Some(Reply {
            kind: ReplyKind::ArpReply,
            frame,
        })
    }

    fn ipv4(&mut self, source: MacAddr, destination: MacAddr, packet: &[u8]) -> Option<Reply> {
        let gateway = self.v4.select(destination)?;
        let ip = Ipv4HeaderSlice::from_slice(packet).ok()?;
        let redirect = Icmpv4Redirect {
            src: gateway.addr,
            dst: ip.source_addr(),
            next_hop: gateway.next_hop,
            original: packet[..packet.len().min(ICMPV4_DATA_MAX)].to_vec(),
        };
        debug!(host = %redirect.dst, next_hop = %redirect.next_hop, "sending ICMP redirect");
        Some(Reply {
            kind: ReplyKind::Icmpv4Redirect,
            frame: redirect.build().with_ethernet(gateway.mac, source).into_bytes(),
        })
    }

    fn ipv6(&mut self, source: MacAddr, destination: MacAddr, packet: &[u8]) -> Option<Reply> {
        let ip = Ipv6HeaderSlice::from_slice(packet).ok()?;
        let upper = &packet[IPV6_HEADER_LEN..];
        match ip.next_header() {
            IpNumber::IPV6_ICMP => match upper.first().copied()? {
                ND_NEIGHBOR_SOLICIT => self.neighbor_solicit(source, &ip, upper),
                ICMPV6_ECHO_REQUEST => self.icmpv6_redirect(source, destination, &ip, packet),
                _ => None,
            },
            IpNumber::UDP => self.icmpv6_redirect(source, destination, &ip, packet),
            _ => None,
        }
    }

    fn neighbor_solicit(
        &mut self,
        source: MacAddr,
        ip: &Ipv6HeaderSlice<'_>,
        ns: &[u8],
    ) -> Option<Reply> {
        if ip.source_addr().is_unspecified() {
            trace!("ignoring duplicate address detection");
            return None;
        }
        let target: [u8; 16] = ns.get(8..24)?.try_into().ok()?;
        let target = Ipv6Addr::from(target);
        let reply_to = source_link_address(&ns[24..]).unwrap_or(source);

        let previous = self.v6.announced;
        let gateway = Ipv6Gateway {
            mac: self.fresh_mac(previous.map(|g| g.mac)),
            addr: target,
            next_hop: self.fresh_ipv6_next_hop(previous.map(|g| g.next_hop)),
        };
        self.v6.announced = Some(gateway);
        debug!(
            gateway = %gateway.addr,
            mac = %gateway.mac,
            next_hop = %gateway.next_hop,
            solicitor = %ip.source_addr(),
            "answering neighbor solicitation"
        );
        let advert = NeighborAdvert {
            target,
            dst: ip.source_addr(),
            mac: gateway.mac,
        };
        Some(Reply {
            kind: ReplyKind::NeighborAdvert,
            frame: advert.build().with_ethernet(gateway.mac, reply_to).into_bytes(),
        })
    }

    fn icmpv6_redirect(
        &mut self,
        source: MacAddr,
        destination: MacAddr,
        ip: &Ipv6HeaderSlice<'_>,
        packet: &[u8],
    ) -> Option<Reply> {
        let gateway = self.v6.select(destination)?;
        let redirect = Icmpv6Redirect {
            src: gateway.addr,
            dst: ip.source_addr(),
            target: gateway.next_hop,
            destination: ip.destination_addr(),
            original: packet.to_vec(),
        };
        debug!(host = %redirect.dst, target = %redirect.target, "sending ND redirect");
        Some(Reply {
            kind: ReplyKind::Icmpv6Redirect,
            frame: redirect.build().with_ethernet(gateway.mac, source).into_bytes(),
        })
    }

    /// `00:00:00:xx:yy:zz`, different from `previous`.
    fn fresh_mac(&mut self, previous: Option<MacAddr>) -> MacAddr {
        loop {
            let mac = MacAddr::new([
                0,
                0,
                0,
                self.rng.gen_range(0..=254),
                self.rng.gen_range(0..=254),
                self.rng.gen_range(1..=254),
            ]);
            if Some(mac) != previous {
                return mac;
            }
        }
    }

    /// `addr` with a random last octet, different from `previous`.
    fn fresh_ipv4_next_hop(&mut self, addr: Ipv4Addr, previous: Option<Ipv4Addr>) -> Ipv4Addr {
        let [a, b, c, _] = addr.octets();
        loop {
            let hop = Ipv4Addr::new(a, b, c, self.rng.gen_range(1..=254));
            if Some(hop) != previous {
                return hop;
            }
        }
    }

    /// `fe80::xx`, different from `previous`.
    fn fresh_ipv6_next_hop(&mut self, previous: Option<Ipv6Addr>) -> Ipv6Addr {
        loop {
            let hop = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, self.rng.gen_range(1..=254));
            if Some(hop) != previous {
                return hop;
            }
        }
    }
}

/// Source Link-Layer Address option from an NS option area.
fn source_link_address(mut options: &[u8]) -> Option<MacAddr> {
    while options.len() >= 8 {
        let len = usize::from(options[1]) * 8;
        if len == 0 || len > options.len() {
            return None;
        }
        if options[0] == ND_OPT_SOURCE_LINKADDR {
            let mac: [u8; 6] = options[2..8].try_into().ok()?;
            return Some(MacAddr::new(mac));
        }
        options = &options[len..];
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{Icmpv4Echo, Icmpv6Echo};
    use crate::checksum::verify;

    const HOST_MAC: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x10]);
    const HOST_V4: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);
    const GW_V4: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

    fn host_v6() -> Ipv6Addr {
        "fe80::10".parse().unwrap()
    }

    fn gw_v6() -> Ipv6Addr {
        "fe80::1".parse().unwrap()
    }

    fn arp_request(op: u16) -> Vec<u8> {
        let mut frame = arp_reply_frame(HOST_MAC, HOST_V4, MacAddr::ZERO, GW_V4);
        frame[..6].copy_from_slice(&MacAddr::BROADCAST.octets());
        frame[ETHERNET_HEADER_LEN + 6..ETHERNET_HEADER_LEN + 8].copy_from_slice(&op.to_be_bytes());
        frame
    }

    fn neighbor_solicit(src: Ipv6Addr, with_slla: bool) -> Vec<u8> {
        let mut ns = vec![ND_NEIGHBOR_SOLICIT, 0, 0, 0, 0, 0, 0, 0];
        ns.extend_from_slice(&gw_v6().octets());
        if with_slla {
            ns.extend_from_slice(&[ND_OPT_SOURCE_LINKADDR, 1]);
            ns.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x99]);
        }
        let mut packet = vec![0u8; IPV6_HEADER_LEN];
        let dst: Ipv6Addr = "ff02::1:ff00:1".parse().unwrap();
        write_ipv6_header(&mut packet, ns.len(), IPPROTO_ICMPV6, ND_HOP_LIMIT, &src, &dst);
        packet.extend_from_slice(&ns);
        frame(HOST_MAC, MacAddr::for_ipv6_multicast(dst), EtherType::IPV6, &packet)
    }

    fn frame(src: MacAddr, dst: MacAddr, ether_type: EtherType, packet: &[u8]) -> Vec<u8> {
        let eth = etherparse::Ethernet2Header {
            source: src.octets(),
            destination: dst.octets(),
            ether_type,
        };
        let mut frame = eth.to_bytes().to_vec();
        frame.extend_from_slice(packet);
        frame
    }

    fn echo_v4_to(gateway_mac: MacAddr) -> Vec<u8> {
        let echo = Icmpv4Echo::new(HOST_V4, Ipv4Addr::new(198, 51, 100, 7), 16).build();
        frame(HOST_MAC, gateway_mac, EtherType::IPV4, echo.as_bytes())
    }

    fn echo_v6_to(gateway_mac: MacAddr) -> Vec<u8> {
        let echo = Icmpv6Echo::new(host_v6(), "2001:db8::7".parse().unwrap(), 16).build();
        frame(HOST_MAC, gateway_mac, EtherType::IPV6, echo.as_bytes())
    }

    fn icmpv6_valid(packet: &[u8]) -> bool {
        let ip = Ipv6HeaderSlice::from_slice(packet).unwrap();
        let upper = &packet[IPV6_HEADER_LEN..];
        let mut zeroed = upper.to_vec();
        zeroed[2] = 0;
        zeroed[3] = 0;
        let expected = pseudo_checksum(
            &ip.source_addr(),
            &ip.destination_addr(),
            upper.len() as u32,
            IPPROTO_ICMPV6,
            &zeroed,
        );
        u16::from_be_bytes([upper[2], upper[3]]) == expected
    }

    #[test]
    fn arp_request_announces_gateway() {
        let mut r = Redirector::with_seed(1);
        let reply = r.handle_frame(&arp_request(ARP_OP_REQUEST)).unwrap();
        assert_eq!(reply.kind, ReplyKind::ArpReply);
        let gw = *r.ipv4_gateway().unwrap();
        assert_eq!(gw.addr, GW_V4);
        assert_eq!(&gw.mac.octets()[..3], &[0, 0, 0]);
        assert_ne!(gw.mac.octets()[5], 0);
        assert_eq!(&gw.next_hop.octets()[..3], &[192, 0, 2]);

        let f = &reply.frame;
        assert_eq!(f.len(), ETHERNET_HEADER_LEN + ARP_PACKET_LEN);
        assert_eq!(&f[..6], &HOST_MAC.octets());
        assert_eq!(&f[6..12], &gw.mac.octets());
        assert_eq!(&f[12..14], &[0x08, 0x06]);
        let arp = &f[ETHERNET_HEADER_LEN..];
        assert_eq!(&arp[..8], &[0, 1, 0x08, 0x00, 6, 4, 0, 2]);
        assert_eq!(&arp[8..14], &gw.mac.octets());
        assert_eq!(&arp[14..18], &GW_V4.octets());
        assert_eq!(&arp[18..24], &HOST_MAC.octets());
        assert_eq!(&arp[24..28], &HOST_V4.octets());
    }

    #[test]
    fn arp_reply_is_ignored() {
        let mut r = Redirector::with_seed(1);
        assert!(r.handle_frame(&arp_request(ARP_OP_REPLY)).is_none());
        assert!(r.ipv4_gateway().is_none());
    }

    #[test]
    fn every_request_rotates_the_gateway() {
        let mut r = Redirector::with_seed(9);
        let mut previous: Option<Ipv4Gateway> = None;
        for _ in 0..50 {
            r.handle_frame(&arp_request(ARP_OP_REQUEST)).unwrap();
            let gw = *r.ipv4_gateway().unwrap();
            if let Some(prev) = previous {
                assert_ne!(gw.mac, prev.mac);
                assert_ne!(gw.next_hop, prev.next_hop);
            }
            previous = Some(gw);
        }
    }

    #[test]
    fn nothing_is_redirected_before_an_announcement() {
        let mut r = Redirector::with_seed(2);
        assert!(r.handle_frame(&echo_v4_to(MacAddr::ZERO)).is_none());
        assert!(r.handle_frame(&echo_v6_to(MacAddr::ZERO)).is_none());
    }

    #[test]
    fn ipv4_to_gateway_gets_host_redirect() {
        let mut r = Redirector::with_seed(3);
        r.handle_frame(&arp_request(ARP_OP_REQUEST)).unwrap();
        let gw = *r.ipv4_gateway().unwrap();

        let offending = echo_v4_to(gw.mac);
        let reply = r.handle_frame(&offending).unwrap();
        assert_eq!(reply.kind, ReplyKind::Icmpv4Redirect);

        let f = &reply.frame;
        assert_eq!(&f[..6], &HOST_MAC.octets());
        assert_eq!(&f[6..12], &gw.mac.octets());
        let ip = Ipv4HeaderSlice::from_slice(&f[ETHERNET_HEADER_LEN..]).unwrap();
        assert_eq!(ip.source_addr(), GW_V4);
        assert_eq!(ip.destination_addr(), HOST_V4);
        assert_eq!(ip.protocol(), IpNumber::ICMP);
        assert!(verify(ip.slice()));

        let icmp = &f[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..];
        assert_eq!(&icmp[..2], &[ICMP_REDIRECT, ICMP_REDIRECT_HOST]);
        assert_eq!(&icmp[4..8], &gw.next_hop.octets());
        assert_eq!(&icmp[8..], &offending[ETHERNET_HEADER_LEN..]);
        assert!(verify(icmp));
    }

    #[test]
    fn other_destinations_are_not_redirected() {
        let mut r = Redirector::with_seed(3);
        r.handle_frame(&arp_request(ARP_OP_REQUEST)).unwrap();
        assert!(r.handle_frame(&echo_v4_to(MacAddr::new([2, 0, 0, 0, 0, 1]))).is_none());
    }

    #[test]
    fn adopted_gateway_survives_a_new_announcement() {
        let mut r = Redirector::with_seed(4);
        r.handle_frame(&arp_request(ARP_OP_REQUEST)).unwrap();
        let first = *r.ipv4_gateway().unwrap();
        r.handle_frame(&echo_v4_to(first.mac)).unwrap();

        r.handle_frame(&arp_request(ARP_OP_REQUEST)).unwrap();
        let second = *r.ipv4_gateway().unwrap();
        let reply = r.handle_frame(&echo_v4_to(first.mac)).unwrap();
        assert_eq!(&reply.frame[6..12], &first.mac.octets());

        // Switching to the new MAC adopts it and retires the old one.
        r.handle_frame(&echo_v4_to(second.mac)).unwrap();
        assert!(r.handle_frame(&echo_v4_to(first.mac)).is_none());
    }

    #[test]
    fn oversized_ipv4_is_truncated() {
        let packet = vec![0x45u8; 1500];
        let redirect = Icmpv4Redirect {
            src: GW_V4,
            dst: HOST_V4,
            next_hop: Ipv4Addr::new(192, 0, 2, 9),
            original: packet,
        };
        let d = redirect.build();
        assert_eq!(d.len(), ETHERNET_MTU);
        assert_eq!(d.payload().len(), ICMP_HEADER_LEN + ICMPV4_DATA_MAX);
        assert!(verify(d.payload()));
    }

    #[test]
    fn solicitation_gets_advertisement() {
        let mut r = Redirector::with_seed(5);
        let reply = r.handle_frame(&neighbor_solicit(host_v6(), true)).unwrap();
        assert_eq!(reply.kind, ReplyKind::NeighborAdvert);
        let gw = *r.ipv6_gateway().unwrap();
        assert_eq!(gw.addr, gw_v6());
        assert_eq!(gw.next_hop.segments()[..7], [0xfe80, 0, 0, 0, 0, 0, 0]);

        let f = &reply.frame;
        // Answered to the link-layer address in the solicitation option.
        assert_eq!(&f[..6], &[0x02, 0, 0, 0, 0, 0x99]);
        assert_eq!(&f[6..12], &gw.mac.octets());
        let packet = &f[ETHERNET_HEADER_LEN..];
        let ip = Ipv6HeaderSlice::from_slice(packet).unwrap();
        assert_eq!(ip.source_addr(), gw_v6());
        assert_eq!(ip.destination_addr(), host_v6());
        assert_eq!(ip.hop_limit(), ND_HOP_LIMIT);
        assert_eq!(usize::from(ip.payload_length()), NEIGHBOR_ADVERT_LEN);

        let na = &packet[IPV6_HEADER_LEN..];
        assert_eq!(na[0], ND_NEIGHBOR_ADVERT);
        assert_eq!(&na[4..8], &[0xE0, 0, 0, 0]);
        assert_eq!(&na[8..24], &gw_v6().octets());
        assert_eq!(&na[24..26], &[ND_OPT_TARGET_LINKADDR, 1]);
        assert_eq!(&na[26..32], &gw.mac.octets());
        assert!(icmpv6_valid(packet));
    }

    #[test]
    fn solicitation_without_option_answers_frame_source() {
        let mut r = Redirector::with_seed(5);
        let reply = r.handle_frame(&neighbor_solicit(host_v6(), false)).unwrap();
        assert_eq!(&reply.frame[..6], &HOST_MAC.octets());
    }

    #[test]
    fn duplicate_address_detection_is_ignored() {
        let mut r = Redirector::with_seed(5);
        assert!(r.handle_frame(&neighbor_solicit(Ipv6Addr::UNSPECIFIED, true)).is_none());
        assert!(r.ipv6_gateway().is_none());
    }

    #[test]
    fn ipv6_echo_to_gateway_gets_redirect() {
        let mut r = Redirector::with_seed(6);
        r.handle_frame(&neighbor_solicit(host_v6(), true)).unwrap();
        let gw = *r.ipv6_gateway().unwrap();

        let offending = echo_v6_to(gw.mac);
        let reply = r.handle_frame(&offending).unwrap();
        assert_eq!(reply.kind, ReplyKind::Icmpv6Redirect);

        let packet = &reply.frame[ETHERNET_HEADER_LEN..];
        let ip = Ipv6HeaderSlice::from_slice(packet).unwrap();
        assert_eq!(ip.source_addr(), gw_v6());
        assert_eq!(ip.destination_addr(), host_v6());
        assert_eq!(ip.hop_limit(), ND_HOP_LIMIT);

        let rd = &packet[IPV6_HEADER_LEN..];
        assert_eq!(rd[0], ND_REDIRECT);
        assert_eq!(&rd[8..24], &gw.next_hop.octets());
        assert_eq!(&rd[24..40], &"2001:db8::7".parse::<Ipv6Addr>().unwrap().octets());
        let original = &offending[ETHERNET_HEADER_LEN..];
        let opt = &rd[ND_REDIRECT_BASE_LEN..];
        assert_eq!(opt[0], ND_OPT_REDIRECTED_HEADER);
        assert_eq!(usize::from(opt[1]) * 8, opt.len());
        assert_eq!(opt.len() % 8, 0);
        assert_eq!(&opt[8..8 + original.len()], original);
        assert!(opt[8 + original.len()..].iter().all(|b| *b == 0));
        assert!(icmpv6_valid(packet));
    }

    #[test]
    fn udp_to_gateway_gets_redirect() {
        let mut r = Redirector::with_seed(7);
        r.handle_frame(&neighbor_solicit(host_v6(), true)).unwrap();
        let gw = *r.ipv6_gateway().unwrap();

        let udp = [0x30, 0x39, 0x00, 0x35, 0x00, 0x08, 0x00, 0x00];
        let mut packet = vec![0u8; IPV6_HEADER_LEN];
        let dst: Ipv6Addr = "2001:db8::53".parse().unwrap();
        write_ipv6_header(&mut packet, udp.len(), 17, 64, &host_v6(), &dst);
        packet.extend_from_slice(&udp);
        let reply = r
            .handle_frame(&frame(HOST_MAC, gw.mac, EtherType::IPV6, &packet))
            .unwrap();
        assert_eq!(reply.kind, ReplyKind::Icmpv6Redirect);
    }

    #[test]
    fn redirected_header_is_capped() {
        let redirect = Icmpv6Redirect {
            src: gw_v6(),
            dst: host_v6(),
            target: "fe80::9".parse().unwrap(),
            destination: "2001:db8::7".parse().unwrap(),
            original: vec![0xAB; 1500],
        };
        assert_eq!(redirect.option_len(), REDIRECTED_HEADER_MAX);
        let d = redirect.build();
        assert!(d.len() <= ETHERNET_MTU);
        assert!(icmpv6_valid(d.as_bytes()));
    }

    #[test]
    fn source_link_address_walks_options() {
        let mut options = vec![14, 1, 0, 0, 0, 0, 0, 0];
        options.extend_from_slice(&[ND_OPT_SOURCE_LINKADDR, 1, 1, 2, 3, 4, 5, 6]);
        assert_eq!(
            source_link_address(&options),
            Some(MacAddr::new([1, 2, 3, 4, 5, 6]))
        );
        assert_eq!(source_link_address(&[ND_OPT_SOURCE_LINKADDR, 0, 0, 0, 0, 0, 0, 0]), None);
        assert_eq!(source_link_address(&[]), None);
    }

    #[test]
    fn truncated_frames_are_ignored() {
        let mut r = Redirector::with_seed(8);
        assert!(r.handle_frame(&[]).is_none());
        assert!(r.handle_frame(&arp_request(ARP_OP_REQUEST)[..20]).is_none());
        assert!(r.handle_frame(&echo_v6_to(MacAddr::ZERO)[..30]).is_none());
    }
}

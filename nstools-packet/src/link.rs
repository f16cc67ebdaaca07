use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use pnet::datalink::{self, NetworkInterface};

use crate::privilege::PacketError;

/// A 6-byte Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pnet::util::MacAddr);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr::new([0xFF; 6]);
    pub const ZERO: MacAddr = MacAddr::new([0; 6]);

    pub const fn new(o: [u8; 6]) -> Self {
        Self(pnet::util::MacAddr(o[0], o[1], o[2], o[3], o[4], o[5]))
    }

    pub fn octets(&self) -> [u8; 6] {
        let pnet::util::MacAddr(a, b, c, d, e, f) = self.0;
        [a, b, c, d, e, f]
    }

    pub fn is_multicast(&self) -> bool {
        self.octets()[0] & 0x01 != 0
    }

    /// Hardware group address for an IPv4 multicast group (RFC 1112):
    /// `01:00:5e` followed by the low 23 bits of the group.
    pub fn for_ipv4_multicast(group: Ipv4Addr) -> Self {
        let o = group.octets();
        Self::new([0x01, 0x00, 0x5E, o[1] & 0x7F, o[2], o[3]])
    }

    /// Hardware group address for an IPv6 multicast group (RFC 2464):
    /// `33:33` followed by the last four bytes of the group.
    pub fn for_ipv6_multicast(group: Ipv6Addr) -> Self {
        let o = group.octets();
        Self::new([0x33, 0x33, o[12], o[13], o[14], o[15]])
    }
}

impl Default for MacAddr {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<pnet::util::MacAddr> for MacAddr {
    fn from(mac: pnet::util::MacAddr) -> Self {
        Self(mac)
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self::new(octets)
    }
}

impl FromStr for MacAddr {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<pnet::util::MacAddr>()
            .map(Self)
            .map_err(|e| PacketError::InvalidConfig(format!("invalid MAC address {s:?}: {e:?}")))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A local network interface resolved by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
    pub mac: MacAddr,
}

impl From<NetworkInterface> for Interface {
    fn from(iface: NetworkInterface) -> Self {
        Self {
            mac: iface.mac.map(MacAddr::from).unwrap_or_default(),
            index: iface.index,
            name: iface.name,
        }
    }
}

impl Interface {
    /// Resolve an interface name to its index and hardware address.
    pub fn lookup(name: &str) -> Result<Self, PacketError> {
        if name.is_empty() {
            return Err(PacketError::Interface("empty interface name".into()));
        }
        datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .map(Self::from)
            .ok_or_else(|| PacketError::Interface(format!("no interface named {name:?}")))
    }

    /// Enumerate all interfaces known to the system, ordered by index.
    pub fn list() -> Result<Vec<Self>, PacketError> {
        let mut found: Vec<Self> = datalink::interfaces().into_iter().map(Self::from).collect();
        if found.is_empty() {
            return Err(PacketError::NoInterface);
        }
        found.sort_by_key(|iface| iface.index);
        Ok(found)
    }
}

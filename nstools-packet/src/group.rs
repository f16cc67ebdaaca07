//! Multicast membership descriptors.
//!
//! These describe socket-option requests, not wire datagrams. The kernel
//! structures (`struct group_req` / `struct group_filter`, RFC 3678) are
//! filled from them by the platform socket-option layer.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::layout::IpFamily;
use crate::privilege::PacketError;

/// Upper bound on generated group lists (`x.y` with 255 * 254 combinations).
pub const MAX_NUMBERED_GROUPS: usize = 255 * 254;

/// Source filter mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Receive only from the listed sources.
    Include,
    /// Receive from everyone except the listed sources.
    Exclude,
}

impl FilterMode {
    pub fn is_include(self) -> bool {
        self == FilterMode::Include
    }
}

impl FromStr for FilterMode {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "include" | "in" => Ok(FilterMode::Include),
            "exclude" | "ex" => Ok(FilterMode::Exclude),
            _ => Err(PacketError::InvalidConfig(format!(
                "filter mode must be include or exclude (got {s:?})"
            ))),
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMode::Include => f.write_str("include"),
            FilterMode::Exclude => f.write_str("exclude"),
        }
    }
}

pub fn family_of(addr: &IpAddr) -> IpFamily {
    match addr {
        IpAddr::V4(_) => IpFamily::V4,
        IpAddr::V6(_) => IpFamily::V6,
    }
}

/// Parse one address and require it to belong to `family`.
pub fn parse_address(family: IpFamily, text: &str) -> Result<IpAddr, PacketError> {
    let addr: IpAddr = text
        .trim()
        .parse()
        .map_err(|_| PacketError::InvalidConfig(format!("invalid {family} address: {text:?}")))?;
    if family_of(&addr) != family {
        return Err(PacketError::InvalidConfig(format!(
            "{addr} is not an {family} address"
        )));
    }
    Ok(addr)
}

/// Parse a comma-separated address list. An empty string yields no sources.
pub fn parse_source_list(family: IpFamily, list: &str) -> Result<Vec<IpAddr>, PacketError> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }
    list.split(',').map(|item| parse_address(family, item)).collect()
}

/// Derive `count` group addresses from `prefix`.
///
/// IPv4 appends `.x.y` with `x = i / 254`, `y = i % 254 + 1`, so a prefix of
/// `239.1` yields `239.1.0.1`, `239.1.0.2`, ... IPv6 appends `:` and the
/// hexadecimal index starting at 1, so `ff0e:` yields `ff0e::1`, `ff0e::2`, ...
pub fn numbered_groups(
    family: IpFamily,
    prefix: &str,
    count: usize,
) -> Result<Vec<IpAddr>, PacketError> {
    if count == 0 || count > MAX_NUMBERED_GROUPS {
        return Err(PacketError::InvalidConfig(format!(
            "number of groups must be between 1 and {MAX_NUMBERED_GROUPS} (got {count})"
        )));
    }
    (0..count)
        .map(|i| {
            let text = match family {
                IpFamily::V4 => format!("{prefix}.{}.{}", i / 254, i % 254 + 1),
                IpFamily::V6 => format!("{prefix}:{:x}", i + 1),
            };
            let addr = parse_address(family, &text)?;
            require_multicast(&addr)?;
            Ok(addr)
        })
        .collect()
}

fn require_multicast(addr: &IpAddr) -> Result<(), PacketError> {
    if !addr.is_multicast() {
        return Err(PacketError::InvalidConfig(format!(
            "{addr} is not a multicast address"
        )));
    }
    Ok(())
}

/// Interface + group, the payload of join and leave requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupRequest {
    pub interface: u32,
    pub group: IpAddr,
}

impl GroupRequest {
    pub fn new(interface: u32, group: IpAddr) -> Result<Self, PacketError> {
        require_multicast(&group)?;
        Ok(Self { interface, group })
    }

    pub fn family(&self) -> IpFamily {
        family_of(&self.group)
    }
}

impl fmt::Display for GroupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on ifindex {}", self.group, self.interface)
    }
}

/// Group request plus filter mode and source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFilter {
    pub request: GroupRequest,
    pub mode: FilterMode,
    pub sources: Vec<IpAddr>,
}

impl SourceFilter {
    pub fn new(
        request: GroupRequest,
        mode: FilterMode,
        sources: Vec<IpAddr>,
    ) -> Result<Self, PacketError> {
        let family = request.family();
        if let Some(bad) = sources.iter().find(|s| family_of(s) != family) {
            return Err(PacketError::InvalidConfig(format!(
                "source {bad} does not match group family {family}"
            )));
        }
        Ok(Self {
            request,
            mode,
            sources,
        })
    }
}

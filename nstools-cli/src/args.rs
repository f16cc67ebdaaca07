use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use clap::{Parser, Subcommand};
use nstools_packet::{CorruptionFlags, FilterMode, IpFamily, MacAddr};

/// nstools: raw-socket packet senders for network stress testing
#[derive(Parser, Debug)]
#[command(
    name = "nstools",
    version,
    about = "Craft, corrupt and send ICMP/MLD/IGMP datagrams; drive multicast membership"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Increase log verbosity (-d info, -dd debug, -ddd trace)
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Fault profile used when corrupting headers (built-in or saved)
    #[arg(long = "profile", value_name = "NAME", global = true)]
    pub profile: Option<String>,

    /// Seed for the fault injector instead of the process id
    #[arg(long = "seed", value_name = "N", global = true)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub fault: FaultArgs,

    /// List available fault profiles and exit
    #[arg(long = "list-profiles")]
    pub list_profiles: bool,

    /// Save the active fault profile under NAME and exit
    #[arg(long = "save-profile", value_name = "NAME")]
    pub save_profile: Option<String>,
}

/// Per-run overrides of the fault profile's probabilities.
#[derive(clap::Args, Debug, Clone, Default, PartialEq)]
pub struct FaultArgs {
    /// Probability of setting the reserved IPv4 flag
    #[arg(long = "p-reserved", value_name = "P", global = true)]
    pub reserved_flag: Option<f64>,

    /// Probability of setting the more-fragments flag
    #[arg(long = "p-more-fragments", value_name = "P", global = true)]
    pub more_fragments: Option<f64>,

    /// Probability of clearing the don't-fragment flag
    #[arg(long = "p-clear-df", value_name = "P", global = true)]
    pub clear_dont_fragment: Option<f64>,

    /// Probability of OR-ing a random fragment offset
    #[arg(long = "p-frag-offset", value_name = "P", global = true)]
    pub fragment_offset: Option<f64>,

    /// Probability of flipping a protocol bit
    #[arg(long = "p-protocol-flip", value_name = "P", global = true)]
    pub protocol_flip: Option<f64>,

    /// Probability of substituting an unregistered protocol number
    #[arg(long = "p-protocol-unknown", value_name = "P", global = true)]
    pub protocol_unknown: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send ICMPv4 echo requests, optionally with corrupted IPv4 headers
    Icmpv4(Icmpv4Args),
    /// Send ICMPv6 echo requests, optionally with corrupted IPv6 headers
    Icmpv6(Icmpv6Args),
    /// Send MLDv2 listener queries
    MldQuery(MldQueryArgs),
    /// Send IGMPv3 membership queries
    IgmpQuery(IgmpQueryArgs),
    /// Join multicast groups, or repeatedly join and leave one
    McastJoin(McastJoinArgs),
    /// Impersonate a gateway and answer traffic through it with ICMP redirects
    Redirector(RedirectorArgs),
    /// Run environment diagnostics
    SelfTest,
}

/// Options shared by every sending subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct TransmitArgs {
    /// Outgoing interface
    #[arg(short = 'I', long = "interface", value_name = "IFNAME")]
    pub interface: String,

    /// Destination hardware address (derived when the destination is multicast)
    #[arg(short = 'M', long = "dst-mac", value_name = "MAC")]
    pub dst_mac: Option<MacAddr>,

    /// Stop after this many seconds (fractions allowed)
    #[arg(short = 't', long = "timeout", value_name = "SECS", conflicts_with = "once")]
    pub timeout: Option<f64>,

    /// Pause between sends in milliseconds
    #[arg(short = 'w', long = "interval", value_name = "MS", default_value_t = 0)]
    pub interval_ms: u64,

    /// Send a single datagram and exit
    #[arg(short = 'o', long = "once")]
    pub once: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct Icmpv4Args {
    #[command(flatten)]
    pub transmit: TransmitArgs,

    /// Source address
    #[arg(short = 'S', long = "src", value_name = "ADDR")]
    pub src: Ipv4Addr,

    /// Destination address
    #[arg(short = 'D', long = "dst", value_name = "ADDR")]
    pub dst: Ipv4Addr,

    /// Echo data size in bytes
    #[arg(short = 's', long = "size", value_name = "BYTES", default_value_t = 0)]
    pub size: usize,

    /// Corrupt the header checksum
    #[arg(short = 'c', long = "break-checksum")]
    pub checksum: bool,

    /// Corrupt the fragmentation flags and offset
    #[arg(short = 'f', long = "break-fragment")]
    pub fragmentation: bool,

    /// Corrupt the destination address
    #[arg(short = 'i', long = "break-daddr")]
    pub destination: bool,

    /// Corrupt the header length
    #[arg(short = 'l', long = "break-ihl")]
    pub header_length: bool,

    /// Corrupt the total length
    #[arg(short = 'L', long = "break-length")]
    pub length: bool,

    /// Corrupt the protocol number
    #[arg(short = 'p', long = "break-protocol")]
    pub protocol: bool,

    /// Corrupt the IP version
    #[arg(short = 'v', long = "break-version")]
    pub version: bool,
}

impl Icmpv4Args {
    pub fn flags(&self) -> CorruptionFlags {
        CorruptionFlags {
            version: self.version,
            header_length: self.header_length,
            length: self.length,
            fragmentation: self.fragmentation,
            protocol: self.protocol,
            checksum: self.checksum,
            destination: self.destination,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct Icmpv6Args {
    #[command(flatten)]
    pub transmit: TransmitArgs,

    #[arg(short = 'S', long = "src", value_name = "ADDR")]
    pub src: Ipv6Addr,

    #[arg(short = 'D', long = "dst", value_name = "ADDR")]
    pub dst: Ipv6Addr,

    /// Echo data size in bytes
    #[arg(short = 's', long = "size", value_name = "BYTES", default_value_t = 0)]
    pub size: usize,

    /// Corrupt the destination address
    #[arg(short = 'i', long = "break-daddr")]
    pub destination: bool,

    /// Corrupt the payload length
    #[arg(short = 'L', long = "break-length")]
    pub length: bool,

    /// Corrupt the next header
    #[arg(short = 'n', long = "break-next-header")]
    pub protocol: bool,

    /// Corrupt the IP version
    #[arg(short = 'v', long = "break-version")]
    pub version: bool,
}

impl Icmpv6Args {
    pub fn flags(&self) -> CorruptionFlags {
        CorruptionFlags {
            version: self.version,
            length: self.length,
            protocol: self.protocol,
            destination: self.destination,
            ..CorruptionFlags::NONE
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct MldQueryArgs {
    #[command(flatten)]
    pub transmit: TransmitArgs,

    #[arg(short = 'S', long = "src", value_name = "ADDR")]
    pub src: Ipv6Addr,

    /// Queried group; all-nodes (general query) when omitted
    #[arg(short = 'D', long = "dst", value_name = "ADDR")]
    pub dst: Option<Ipv6Addr>,

    /// Maximum Response Code in milliseconds
    #[arg(short = 'r', long = "max-resp", value_name = "MS")]
    pub max_response: Option<u16>,

    /// Comma separated source addresses
    #[arg(short = 'a', long = "sources", value_name = "ADDRS")]
    pub sources: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct IgmpQueryArgs {
    #[command(flatten)]
    pub transmit: TransmitArgs,

    #[arg(short = 'S', long = "src", value_name = "ADDR")]
    pub src: Ipv4Addr,

    /// Queried group; all-systems (general query) when omitted
    #[arg(short = 'g', long = "group", value_name = "ADDR")]
    pub group: Option<Ipv4Addr>,

    /// Maximum Response Code in tenths of a second
    #[arg(short = 'r', long = "max-resp", value_name = "CODE")]
    pub max_response: Option<u8>,

    /// Comma separated source addresses
    #[arg(short = 'a', long = "sources", value_name = "ADDRS")]
    pub sources: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct McastJoinArgs {
    /// Address family
    #[arg(short = 'f', long = "family", value_name = "4|6", default_value = "4",
          value_parser = parse_family)]
    pub family: IpFamily,

    /// Interface to join on
    #[arg(short = 'I', long = "interface", value_name = "IFNAME")]
    pub interface: String,

    /// Multicast group address
    #[arg(short = 'a', long = "addr", value_name = "ADDR",
          required_unless_present = "prefix", conflicts_with = "prefix")]
    pub addr: Option<IpAddr>,

    /// Prefix of numbered groups (e.g. 239.1 or ff0e:)
    #[arg(short = 'p', long = "prefix", value_name = "PREFIX", requires = "count")]
    pub prefix: Option<String>,

    /// Number of numbered groups to join
    #[arg(short = 'n', long = "count", value_name = "N")]
    pub count: Option<usize>,

    /// Use a separate socket per group
    #[arg(short = 'm', long = "multi-socket")]
    pub multi_socket: bool,

    /// Source filter mode
    #[arg(short = 'F', long = "filter-mode", value_name = "include|exclude",
          default_value = "include")]
    pub filter_mode: FilterMode,

    /// Comma separated source addresses for the filter
    #[arg(short = 's', long = "sources", value_name = "ADDRS")]
    pub sources: Option<String>,

    /// Join and leave this many times instead of holding membership
    #[arg(short = 'l', long = "join-leave", value_name = "TIMES", requires = "addr")]
    pub join_leave: Option<u64>,

    /// Pause after each join and leave in milliseconds
    #[arg(short = 'i', long = "interval", value_name = "MS", default_value_t = 0)]
    pub interval_ms: u64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RedirectorArgs {
    /// Interface to capture and inject on
    #[arg(short = 'I', long = "interface", value_name = "IFNAME")]
    pub interface: String,

    /// Stop after this many seconds (fractions allowed, 0 runs until stopped)
    #[arg(short = 't', long = "timeout", value_name = "SECS")]
    pub timeout: Option<f64>,
}

fn parse_family(s: &str) -> Result<IpFamily, String> {
    match s {
        "4" | "inet" => Ok(IpFamily::V4),
        "6" | "inet6" => Ok(IpFamily::V6),
        _ => Err(format!("address family must be 4 or 6 (got {s})")),
    }
}

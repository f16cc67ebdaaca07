pub mod build;
pub mod checksum;
pub mod corrupt_flags;
pub mod datagram;
pub mod fault;
pub mod group;
pub mod layout;
pub mod link;
pub mod payload;
pub mod platform;
pub mod privilege;
pub mod protocols;
pub mod redirect;
pub mod traits;

#[cfg(target_os = "linux")]
pub mod capture_linux;
#[cfg(target_os = "linux")]
pub mod membership_linux;
#[cfg(target_os = "linux")]
pub mod sender_linux;

pub use build::{
    DatagramBuilder, IPV4_ALL_SYSTEMS, IPV6_ALL_NODES, Icmpv4Echo, Icmpv6Echo, IgmpQuery, MldQuery,
    check_icmpv4_payload, check_icmpv6_payload, check_igmp_sources, check_mld_sources,
};
pub use checksum::{checksum, pseudo_checksum, verify};
pub use corrupt_flags::CorruptionFlags;
pub use datagram::{Datagram, DatagramKind};
pub use fault::{CorruptionReport, FaultInjector, FaultProfile, Mutation};
pub use group::{FilterMode, GroupRequest, SourceFilter, numbered_groups, parse_source_list};
pub use layout::{FieldRole, IpFamily};
pub use link::{Interface, MacAddr};
#[cfg(target_os = "linux")]
pub use membership_linux::{join_group, leave_group, membership_socket, set_source_filter};
pub use platform::{create_sender, open_frame_tap};
pub use privilege::{PacketError, PrivilegeLevel, check_privileges};
pub use protocols::ProtocolTable;
pub use redirect::{Icmpv4Redirect, Icmpv6Redirect, NeighborAdvert, Redirector, Reply, ReplyKind};
pub use traits::{FrameTap, PacketSender};

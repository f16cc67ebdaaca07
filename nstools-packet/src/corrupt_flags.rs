use std::fmt;

use crate::layout::{FieldRole, HeaderLayout, IpFamily};

/// Header field families to disturb on each transmission.
///
/// Built once from command-line toggles and handed to the
/// [`FaultInjector`](crate::fault::FaultInjector) unchanged for every send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorruptionFlags {
    pub version: bool,
    pub header_length: bool,
    pub length: bool,
    pub fragmentation: bool,
    pub protocol: bool,
    pub checksum: bool,
    pub destination: bool,
}

impl CorruptionFlags {
    /// Clean traffic.
    pub const NONE: Self = Self {
        version: false,
        header_length: false,
        length: false,
        fragmentation: false,
        protocol: false,
        checksum: false,
        destination: false,
    };

    pub const ALL: Self = Self {
        version: true,
        header_length: true,
        length: true,
        fragmentation: true,
        protocol: true,
        checksum: true,
        destination: true,
    };

    pub const CHECKSUM: Self = Self {
        checksum: true,
        ..Self::NONE
    };

    pub const PROTOCOL: Self = Self {
        protocol: true,
        ..Self::NONE
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }

    pub fn contains(&self, role: FieldRole) -> bool {
        match role {
            FieldRole::Version => self.version,
            FieldRole::HeaderLength => self.header_length,
            FieldRole::Length => self.length,
            FieldRole::Fragmentation => self.fragmentation,
            FieldRole::Protocol => self.protocol,
            FieldRole::Checksum => self.checksum,
            FieldRole::Destination => self.destination,
        }
    }

    /// Requested roles in application order (checksum last).
    pub fn roles(&self) -> Vec<FieldRole> {
        [
            FieldRole::Version,
            FieldRole::HeaderLength,
            FieldRole::Length,
            FieldRole::Fragmentation,
            FieldRole::Protocol,
            FieldRole::Destination,
            FieldRole::Checksum,
        ]
        .into_iter()
        .filter(|role| self.contains(*role))
        .collect()
    }

    /// Requested roles with no corresponding field in `family`'s header.
    pub fn unsupported_for(&self, family: IpFamily) -> Vec<FieldRole> {
        let layout = HeaderLayout::for_family(family);
        self.roles()
            .into_iter()
            .filter(|role| layout.field(*role).is_none())
            .collect()
    }
}

impl fmt::Display for CorruptionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        macro_rules! write_flag {
            ($flag:expr, $name:literal) => {
                if $flag {
                    if !first {
                        f.write_str("+")?;
                    }
                    f.write_str($name)?;
                    first = false;
                }
            };
        }
        write_flag!(self.version, "version");
        write_flag!(self.header_length, "ihl");
        write_flag!(self.length, "length");
        write_flag!(self.fragmentation, "frag");
        write_flag!(self.protocol, "protocol");
        write_flag!(self.destination, "daddr");
        write_flag!(self.checksum, "checksum");
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

//! Header field descriptors for IPv4 and IPv6.
//!
//! A field is located by the byte offset of the big-endian container that
//! holds it, the bit position of its least significant bit inside that
//! container, and its width. Offsets are relative to the start of the
//! network-layer header.

use std::fmt;

/// Fixed IPv4 header length without options.
pub const IPV4_HEADER_LEN: usize = 20;
/// Fixed IPv6 header length.
pub const IPV6_HEADER_LEN: usize = 40;

/// IPv4 flags/fragment-offset bits (host order view of bytes 6..8).
pub const IPV4_FLAG_RESERVED: u16 = 0x8000;
pub const IPV4_FLAG_DONT_FRAGMENT: u16 = 0x4000;
pub const IPV4_FLAG_MORE_FRAGMENTS: u16 = 0x2000;
pub const IPV4_FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

/// Network-layer family of a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// EtherType carried in a link-layer header for this family.
    pub fn ethertype(self) -> u16 {
        match self {
            IpFamily::V4 => ETHERTYPE_IPV4,
            IpFamily::V6 => ETHERTYPE_IPV6,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => write!(f, "IPv4"),
            IpFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// Semantic role of a header field the fault injector knows how to disturb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    Version,
    HeaderLength,
    /// IPv4 total length or IPv6 payload length.
    Length,
    /// IPv4 flags + fragment offset.
    Fragmentation,
    /// IPv4 protocol or IPv6 next header.
    Protocol,
    Checksum,
    Destination,
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldRole::Version => "version",
            FieldRole::HeaderLength => "header-length",
            FieldRole::Length => "length",
            FieldRole::Fragmentation => "fragmentation",
            FieldRole::Protocol => "protocol",
            FieldRole::Checksum => "checksum",
            FieldRole::Destination => "destination",
        };
        f.write_str(name)
    }
}

/// Location of one field inside a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub role: FieldRole,
    /// First byte of the big-endian container holding the field.
    pub offset: usize,
    /// Bit position of the field's least significant bit within the container.
    pub shift: u8,
    /// Width in bits. Fields wider than 32 bits are accessed through [`word`](Self::word).
    pub width: u8,
}

impl FieldDescriptor {
    pub const fn new(role: FieldRole, offset: usize, shift: u8, width: u8) -> Self {
        Self {
            role,
            offset,
            shift,
            width,
        }
    }

    fn container_len(&self) -> usize {
        (self.shift as usize + self.width as usize).div_ceil(8)
    }

    fn mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    fn read_container(&self, header: &[u8]) -> u32 {
        header[self.offset..self.offset + self.container_len()]
            .iter()
            .fold(0u32, |acc, &b| acc << 8 | b as u32)
    }

    fn write_container(&self, header: &mut [u8], raw: u32) {
        let len = self.container_len();
        let bytes = raw.to_be_bytes();
        header[self.offset..self.offset + len].copy_from_slice(&bytes[4 - len..]);
    }

    /// Read the field value (host order).
    pub fn read(&self, header: &[u8]) -> u32 {
        debug_assert!(self.width <= 32, "use word() for wide fields");
        (self.read_container(header) >> self.shift) & self.mask()
    }

    /// Overwrite the field, leaving neighbouring bits in the container intact.
    pub fn write(&self, header: &mut [u8], value: u32) {
        debug_assert!(self.width <= 32, "use word() for wide fields");
        let mask = self.mask() << self.shift;
        let raw = (self.read_container(header) & !mask) | ((value << self.shift) & mask);
        self.write_container(header, raw);
    }

    /// Invert bit `bit` of the field (bit 0 is the field's least significant bit).
    pub fn flip_bit(&self, header: &mut [u8], bit: u32) {
        debug_assert!(bit < self.width as u32);
        let value = self.read(header) ^ (1u32 << bit);
        self.write(header, value);
    }

    /// Number of 32-bit words in a wide field (1 for fields up to 32 bits).
    pub fn words(&self) -> usize {
        (self.width as usize).div_ceil(32)
    }

    /// The `index`th 32-bit word of a wide field, most significant first.
    pub fn word(&self, index: usize) -> FieldDescriptor {
        if self.width <= 32 {
            return *self;
        }
        debug_assert!(index < self.words());
        FieldDescriptor::new(self.role, self.offset + index * 4, 0, 32)
    }
}

/// Descriptor table for one network-layer header format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    pub family: IpFamily,
    pub version: FieldDescriptor,
    pub header_length: Option<FieldDescriptor>,
    pub length: FieldDescriptor,
    pub fragmentation: Option<FieldDescriptor>,
    pub protocol: FieldDescriptor,
    pub checksum: Option<FieldDescriptor>,
    pub destination: FieldDescriptor,
}

pub const IPV4_LAYOUT: HeaderLayout = HeaderLayout {
    family: IpFamily::V4,
    version: FieldDescriptor::new(FieldRole::Version, 0, 4, 4),
    header_length: Some(FieldDescriptor::new(FieldRole::HeaderLength, 0, 0, 4)),
    length: FieldDescriptor::new(FieldRole::Length, 2, 0, 16),
    fragmentation: Some(FieldDescriptor::new(FieldRole::Fragmentation, 6, 0, 16)),
    protocol: FieldDescriptor::new(FieldRole::Protocol, 9, 0, 8),
    checksum: Some(FieldDescriptor::new(FieldRole::Checksum, 10, 0, 16)),
    destination: FieldDescriptor::new(FieldRole::Destination, 16, 0, 32),
};

pub const IPV6_LAYOUT: HeaderLayout = HeaderLayout {
    family: IpFamily::V6,
    version: FieldDescriptor::new(FieldRole::Version, 0, 4, 4),
    header_length: None,
    length: FieldDescriptor::new(FieldRole::Length, 4, 0, 16),
    fragmentation: None,
    protocol: FieldDescriptor::new(FieldRole::Protocol, 6, 0, 8),
    checksum: None,
    destination: FieldDescriptor::new(FieldRole::Destination, 24, 0, 128),
};

impl HeaderLayout {
    pub fn for_family(family: IpFamily) -> &'static HeaderLayout {
        match family {
            IpFamily::V4 => &IPV4_LAYOUT,
            IpFamily::V6 => &IPV6_LAYOUT,
        }
    }

    /// Descriptor for `role`, or `None` when the format has no such field.
    pub fn field(&self, role: FieldRole) -> Option<FieldDescriptor> {
        match role {
            FieldRole::Version => Some(self.version),
            FieldRole::HeaderLength => self.header_length,
            FieldRole::Length => Some(self.length),
            FieldRole::Fragmentation => self.fragmentation,
            FieldRole::Protocol => Some(self.protocol),
            FieldRole::Checksum => self.checksum,
            FieldRole::Destination => Some(self.destination),
        }
    }
}

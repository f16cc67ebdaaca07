//! Controlled header corruption for negative-path testing.
//!
//! The injector walks the requested [`CorruptionFlags`] through the datagram's
//! [`HeaderLayout`](crate::layout::HeaderLayout) and disturbs each field in place. For IPv4 the header
//! checksum is then recomputed over the (possibly corrupted) header, and a
//! requested checksum corruption is applied strictly after that.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::corrupt_flags::CorruptionFlags;
use crate::datagram::Datagram;
use crate::layout::{
    FieldDescriptor, FieldRole, IPV4_FLAG_DONT_FRAGMENT, IPV4_FLAG_MORE_FRAGMENTS,
    IPV4_FLAG_RESERVED, IPV4_FRAGMENT_OFFSET_MASK,
};
use crate::privilege::PacketError;
use crate::protocols::ProtocolTable;

/// Probabilities driving the randomized corruptions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultProfile {
    /// Chance of setting the reserved ("evil") flag bit.
    pub reserved_flag: f64,
    pub more_fragments: f64,
    pub clear_dont_fragment: f64,
    pub fragment_offset: f64,
    /// Chance of flipping one bit of the protocol / next-header field.
    pub protocol_flip: f64,
    /// Chance of replacing it with an unregistered protocol number.
    pub protocol_unknown: f64,
}

impl Default for FaultProfile {
    fn default() -> Self {
        Self {
            reserved_flag: 1.0 / 16.0,
            more_fragments: 1.0 / 3.0,
            clear_dont_fragment: 1.0 / 3.0,
            fragment_offset: 1.0 / 3.0,
            protocol_flip: 0.4,
            protocol_unknown: 0.4,
        }
    }
}

impl FaultProfile {
    pub fn validate(&self) -> Result<(), PacketError> {
        let fields = [
            ("reserved_flag", self.reserved_flag),
            ("more_fragments", self.more_fragments),
            ("clear_dont_fragment", self.clear_dont_fragment),
            ("fragment_offset", self.fragment_offset),
            ("protocol_flip", self.protocol_flip),
            ("protocol_unknown", self.protocol_unknown),
        ];
        for (name, p) in fields {
            if !(0.0..=1.0).contains(&p) {
                return Err(PacketError::InvalidConfig(format!(
                    "{name} must be a probability between 0 and 1 (got {p})"
                )));
            }
        }
        if self.protocol_flip + self.protocol_unknown > 1.0 {
            return Err(PacketError::InvalidConfig(format!(
                "protocol_flip + protocol_unknown must not exceed 1 (got {})",
                self.protocol_flip + self.protocol_unknown
            )));
        }
        Ok(())
    }
}

/// One change applied to a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// Bit `bit` of word `word` of the field was inverted.
    BitFlip { role: FieldRole, word: usize, bit: u32 },
    SetFlag(u16),
    ClearFlag(u16),
    FragmentOffset(u16),
    ProtocolReplaced { from: u8, to: u8 },
    ChecksumRecomputed(u16),
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::BitFlip { role, word, bit } => {
                write!(f, "bit reverse {role} word {word} bit {bit}")
            }
            Mutation::SetFlag(IPV4_FLAG_RESERVED) => write!(f, "set reserved flag"),
            Mutation::SetFlag(IPV4_FLAG_MORE_FRAGMENTS) => write!(f, "set more fragments flag"),
            Mutation::SetFlag(flag) => write!(f, "set flag {flag:#06x}"),
            Mutation::ClearFlag(IPV4_FLAG_DONT_FRAGMENT) => write!(f, "unset don't fragment flag"),
            Mutation::ClearFlag(flag) => write!(f, "clear flag {flag:#06x}"),
            Mutation::FragmentOffset(off) => write!(f, "fragment offset |= {off:#06x}"),
            Mutation::ProtocolReplaced { from, to } => {
                write!(f, "unknown protocol {from} -> {to}")
            }
            Mutation::ChecksumRecomputed(value) => write!(f, "checksum recomputed {value:#06x}"),
        }
    }
}

/// Ordered record of what [`FaultInjector::corrupt`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorruptionReport {
    pub mutations: Vec<Mutation>,
    /// Requested roles the datagram's family has no field for.
    pub skipped: Vec<FieldRole>,
}

impl CorruptionReport {
    fn push(&mut self, mutation: Mutation) {
        debug!(%mutation, "corrupted header");
        self.mutations.push(mutation);
    }

    /// True when the header bytes were left as built (a checksum refresh of
    /// an intact header does not count).
    pub fn is_clean(&self) -> bool {
        self.mutations
            .iter()
            .all(|m| matches!(m, Mutation::ChecksumRecomputed(_)))
    }

    /// Bit inverted by the final checksum corruption, if one was applied.
    pub fn checksum_flip(&self) -> Option<u32> {
        match self.mutations.last() {
            Some(Mutation::BitFlip {
                role: FieldRole::Checksum,
                bit,
                ..
            }) => Some(*bit),
            _ => None,
        }
    }
}

/// Seeded header corruptor.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    rng: StdRng,
    profile: FaultProfile,
    registry: ProtocolTable,
    unknown_protocol: Option<u8>,
}

impl FaultInjector {
    /// Seed from the process id, once per process.
    pub fn from_process_id() -> Self {
        Self::with_seed(u64::from(std::process::id()))
    }

    pub fn with_seed(seed: u64) -> Self {
        let registry = ProtocolTable::system();
        Self {
            rng: StdRng::seed_from_u64(seed),
            profile: FaultProfile::default(),
            unknown_protocol: registry.first_unregistered(),
            registry,
        }
    }

    pub fn with_profile(mut self, profile: FaultProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_registry(mut self, registry: ProtocolTable) -> Self {
        self.unknown_protocol = registry.first_unregistered();
        self.registry = registry;
        self
    }

    pub fn profile(&self) -> &FaultProfile {
        &self.profile
    }

    pub fn registry(&self) -> &ProtocolTable {
        &self.registry
    }

    /// Protocol number substituted by the unknown-protocol branch.
    pub fn unknown_protocol(&self) -> Option<u8> {
        self.unknown_protocol
    }

    /// Corrupt `datagram` in place according to `flags`.
    pub fn corrupt(&mut self, datagram: &mut Datagram, flags: CorruptionFlags) -> CorruptionReport {
        let mut report = CorruptionReport::default();
        if flags.is_empty() {
            return report;
        }
        let layout = *datagram.layout();

        for role in flags.roles() {
            if role == FieldRole::Checksum {
                continue;
            }
            let Some(desc) = layout.field(role) else {
                debug!(%role, family = %layout.family, "field absent, skipping corruption");
                report.skipped.push(role);
                continue;
            };
            let header = datagram.header_mut();
            match role {
                FieldRole::Version | FieldRole::HeaderLength => {
                    let bit = self.rng.gen_range(0..u32::from(desc.width));
                    self.flip(header, desc, 0, bit, &mut report);
                }
                FieldRole::Length => {
                    let bit = self.weighted_bit(desc.width);
                    self.flip(header, desc, 0, bit, &mut report);
                }
                FieldRole::Fragmentation => self.fragmentation(header, desc, &mut report),
                FieldRole::Protocol => self.protocol(header, desc, &mut report),
                FieldRole::Destination => {
                    let word = self.rng.gen_range(0..desc.words());
                    let target = desc.word(word);
                    let bit = self.weighted_bit(target.width);
                    self.flip(header, target, word, bit, &mut report);
                }
                FieldRole::Checksum => {}
            }
        }

        if let Some(value) = datagram.refresh_header_checksum() {
            report.push(Mutation::ChecksumRecomputed(value));
        }

        if flags.checksum {
            match layout.checksum {
                Some(desc) => {
                    let bit = self.weighted_bit(desc.width);
                    self.flip(datagram.header_mut(), desc, 0, bit, &mut report);
                }
                None => {
                    debug!(family = %layout.family, "no header checksum, skipping corruption");
                    report.skipped.push(FieldRole::Checksum);
                }
            }
        }

        report
    }

    fn flip(
        &mut self,
        header: &mut [u8],
        desc: FieldDescriptor,
        word: usize,
        bit: u32,
        report: &mut CorruptionReport,
    ) {
        desc.flip_bit(header, bit);
        report.push(Mutation::BitFlip {
            role: desc.role,
            word,
            bit,
        });
    }

    /// Pick a bit of a `width`-bit field, favouring the low-order byte: an
    /// extra `width / 8` outcomes all land in bits 0..8.
    fn weighted_bit(&mut self, width: u8) -> u32 {
        let width = u32::from(width);
        let roll = self.rng.gen_range(0..width + width / 8);
        if roll < width {
            roll
        } else {
            self.rng.gen_range(0..8u32.min(width))
        }
    }

    fn roll(&mut self, probability: f64) -> bool {
        self.rng.r#gen::<f64>() < probability
    }

    fn fragmentation(
        &mut self,
        header: &mut [u8],
        desc: FieldDescriptor,
        report: &mut CorruptionReport,
    ) {
        let mut value = desc.read(header) as u16;
        if self.roll(self.profile.reserved_flag) {
            value |= IPV4_FLAG_RESERVED;
            report.push(Mutation::SetFlag(IPV4_FLAG_RESERVED));
        }
        if self.roll(self.profile.more_fragments) {
            value |= IPV4_FLAG_MORE_FRAGMENTS;
            report.push(Mutation::SetFlag(IPV4_FLAG_MORE_FRAGMENTS));
        }
        if self.roll(self.profile.clear_dont_fragment) {
            value &= !IPV4_FLAG_DONT_FRAGMENT;
            report.push(Mutation::ClearFlag(IPV4_FLAG_DONT_FRAGMENT));
        }
        if self.roll(self.profile.fragment_offset) {
            let offset = self.rng.gen_range(1..=IPV4_FRAGMENT_OFFSET_MASK);
            value |= offset;
            report.push(Mutation::FragmentOffset(offset));
        }
        desc.write(header, u32::from(value));
    }

    fn protocol(&mut self, header: &mut [u8], desc: FieldDescriptor, report: &mut CorruptionReport) {
        let roll: f64 = self.rng.r#gen();
        if roll < self.profile.protocol_flip {
            let bit = self.rng.gen_range(0..u32::from(desc.width));
            self.flip(header, desc, 0, bit, report);
        } else if roll < self.profile.protocol_flip + self.profile.protocol_unknown {
            match self.unknown_protocol {
                Some(to) => {
                    let from = desc.read(header) as u8;
                    desc.write(header, u32::from(to));
                    report.push(Mutation::ProtocolReplaced { from, to });
                }
                None => debug!("every protocol number is registered, leaving field intact"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{DatagramBuilder, Icmpv4Echo, Icmpv6Echo};
    use crate::checksum::verify;
    use crate::layout::IPV4_LAYOUT;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn echo4() -> Datagram {
        Icmpv4Echo::new(Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(192, 0, 2, 2), 0).build()
    }

    fn echo6() -> Datagram {
        Icmpv6Echo::new(
            "2001:db8::1".parse::<Ipv6Addr>().unwrap(),
            "2001:db8::2".parse::<Ipv6Addr>().unwrap(),
            16,
        )
        .build()
    }

    fn differing_bits(a: &[u8], b: &[u8]) -> Vec<usize> {
        a.iter()
            .zip(b)
            .enumerate()
            .flat_map(|(i, (x, y))| {
                let diff = x ^ y;
                (0..8).filter(move |bit| diff & (1 << bit) != 0).map(move |bit| i * 8 + bit)
            })
            .collect()
    }

    fn registry() -> ProtocolTable {
        ProtocolTable::from_entries([
            (0, "ip"),
            (1, "icmp"),
            (2, "igmp"),
            (3, "ggp"),
            (4, "ipencap"),
            (5, "st"),
            (6, "tcp"),
            (17, "udp"),
        ])
    }

    fn injector(seed: u64) -> FaultInjector {
        FaultInjector::with_seed(seed).with_registry(registry())
    }

    #[test]
    fn empty_flags_leave_datagram_untouched() {
        let clean = echo4();
        let mut d = clean.clone();
        let report = injector(1).corrupt(&mut d, CorruptionFlags::NONE);
        assert_eq!(d, clean);
        assert!(report.mutations.is_empty());
    }

    #[test]
    fn checksum_only_changes_checksum_field() {
        let clean = echo4();
        for seed in 0..200 {
            let mut d = clean.clone();
            let report = injector(seed).corrupt(&mut d, CorruptionFlags::CHECKSUM);

            let bits = differing_bits(clean.as_bytes(), d.as_bytes());
            assert_eq!(bits.len(), 1, "seed {seed}: exactly one bit should change");
            let byte = bits[0] / 8;
            assert!((10..12).contains(&byte), "seed {seed}: changed byte {byte}");
            assert!(report.checksum_flip().is_some());
            assert!(!verify(d.header()));
        }
    }

    #[test]
    fn unflipping_checksum_restores_consistency() {
        let clean = echo4();
        let checksum = IPV4_LAYOUT.checksum.unwrap();
        for seed in 0..500 {
            let mut d = clean.clone();
            let report = injector(seed).corrupt(&mut d, CorruptionFlags::ALL);
            let bit = report.checksum_flip().expect("checksum flip must come last");
            assert!(matches!(
                report.mutations[report.mutations.len() - 2],
                Mutation::ChecksumRecomputed(_)
            ));

            checksum.flip_bit(d.header_mut(), bit);
            assert!(verify(d.header()), "seed {seed}: header should validate after undo");
        }
    }

    #[test]
    fn other_corruptions_refresh_checksum() {
        let clean = echo4();
        let flags = CorruptionFlags {
            destination: true,
            length: true,
            ..CorruptionFlags::NONE
        };
        for seed in 0..50 {
            let mut d = clean.clone();
            injector(seed).corrupt(&mut d, flags);
            assert_ne!(d.header(), clean.header());
            assert!(verify(d.header()));
        }
    }

    #[test]
    fn unknown_protocol_is_never_registered() {
        let registry = ProtocolTable::system();
        let mut inj = FaultInjector::with_seed(42).with_registry(registry.clone());
        let clean = echo4();
        let mut replaced = 0;
        for _ in 0..1000 {
            let mut d = clean.clone();
            let report = inj.corrupt(&mut d, CorruptionFlags::PROTOCOL);
            for m in &report.mutations {
                if let Mutation::ProtocolReplaced { from, to } = *m {
                    assert_eq!(from, 1);
                    assert!(!registry.is_registered(to), "protocol {to} is registered");
                    assert_eq!(d.field(FieldRole::Protocol), Some(u32::from(to)));
                    replaced += 1;
                }
            }
        }
        assert!(replaced > 0, "unknown-protocol branch never taken");
    }

    #[test]
    fn protocol_branches_follow_profile() {
        let clean = echo4();
        let never = FaultProfile {
            protocol_flip: 0.0,
            protocol_unknown: 0.0,
            ..FaultProfile::default()
        };
        let mut inj = injector(7).with_profile(never);
        for _ in 0..100 {
            let mut d = clean.clone();
            let report = inj.corrupt(&mut d, CorruptionFlags::PROTOCOL);
            assert!(report.is_clean());
            assert_eq!(d, clean);
        }

        let always_unknown = FaultProfile {
            protocol_flip: 0.0,
            protocol_unknown: 1.0,
            ..FaultProfile::default()
        };
        let mut inj = injector(7).with_profile(always_unknown);
        let mut d = clean.clone();
        inj.corrupt(&mut d, CorruptionFlags::PROTOCOL);
        assert_eq!(d.field(FieldRole::Protocol), Some(7));
    }

    #[test]
    fn empty_registry_substitutes_protocol_zero() {
        let always_unknown = FaultProfile {
            protocol_flip: 0.0,
            protocol_unknown: 1.0,
            ..FaultProfile::default()
        };
        let mut inj = FaultInjector::with_seed(3)
            .with_registry(ProtocolTable::default())
            .with_profile(always_unknown);
        assert_eq!(inj.unknown_protocol(), Some(0));
        let mut d = echo4();
        let report = inj.corrupt(&mut d, CorruptionFlags::PROTOCOL);
        assert_eq!(report.mutations[0], Mutation::ProtocolReplaced { from: 1, to: 0 });
        assert_eq!(d.field(FieldRole::Protocol), Some(0));
    }

    #[test]
    fn full_registry_leaves_protocol_intact() {
        let always_unknown = FaultProfile {
            protocol_flip: 0.0,
            protocol_unknown: 1.0,
            ..FaultProfile::default()
        };
        let full = ProtocolTable::from_lookup(|n| Some(n.to_string()));
        let mut inj = FaultInjector::with_seed(3)
            .with_registry(full)
            .with_profile(always_unknown);
        let clean = echo4();
        let mut d = clean.clone();
        assert!(inj.corrupt(&mut d, CorruptionFlags::PROTOCOL).is_clean());
        assert_eq!(d, clean);
    }

    #[test]
    fn fragmentation_effects_all_apply_when_certain() {
        let certain = FaultProfile {
            reserved_flag: 1.0,
            more_fragments: 1.0,
            clear_dont_fragment: 1.0,
            fragment_offset: 1.0,
            ..FaultProfile::default()
        };
        let mut d = echo4();
        let flags = CorruptionFlags {
            fragmentation: true,
            ..CorruptionFlags::NONE
        };
        injector(3).with_profile(certain).corrupt(&mut d, flags);
        let frag = d.field(FieldRole::Fragmentation).unwrap() as u16;
        assert_ne!(frag & IPV4_FLAG_RESERVED, 0);
        assert_ne!(frag & IPV4_FLAG_MORE_FRAGMENTS, 0);
        assert_eq!(frag & IPV4_FLAG_DONT_FRAGMENT, 0);
        assert_ne!(frag & IPV4_FRAGMENT_OFFSET_MASK, 0);
        assert!(verify(d.header()));
    }

    #[test]
    fn ipv6_destination_flip_stays_in_address() {
        let clean = echo6();
        let flags = CorruptionFlags {
            destination: true,
            ..CorruptionFlags::NONE
        };
        let mut words_seen = [false; 4];
        for seed in 0..200 {
            let mut d = clean.clone();
            let report = injector(seed).corrupt(&mut d, flags);
            let bits = differing_bits(clean.as_bytes(), d.as_bytes());
            assert_eq!(bits.len(), 1);
            assert!((24..40).contains(&(bits[0] / 8)));
            if let Some(Mutation::BitFlip { word, .. }) = report.mutations.first() {
                words_seen[*word] = true;
            }
        }
        assert!(words_seen.iter().all(|w| *w), "every word should be chosen");
    }

    #[test]
    fn ipv6_skips_absent_fields() {
        let clean = echo6();
        let flags = CorruptionFlags {
            header_length: true,
            fragmentation: true,
            checksum: true,
            ..CorruptionFlags::NONE
        };
        let mut d = clean.clone();
        let report = injector(1).corrupt(&mut d, flags);
        assert_eq!(d, clean);
        assert_eq!(
            report.skipped,
            vec![FieldRole::HeaderLength, FieldRole::Fragmentation, FieldRole::Checksum]
        );
    }

    #[test]
    fn same_seed_same_corruption() {
        let clean = echo4();
        let mut a = injector(99);
        let mut b = injector(99);
        for _ in 0..20 {
            let mut da = clean.clone();
            let mut db = clean.clone();
            let ra = a.corrupt(&mut da, CorruptionFlags::ALL);
            let rb = b.corrupt(&mut db, CorruptionFlags::ALL);
            assert_eq!(da, db);
            assert_eq!(ra, rb);
        }
    }

    #[test]
    fn weighted_bit_favours_low_byte() {
        let mut inj = injector(5);
        let low = (0..10_000)
            .filter(|_| inj.weighted_bit(16) < 8)
            .count();
        // 8/18 + 2/18 ≈ 0.56 of draws land in the low byte.
        assert!(low > 5_000, "low-byte draws: {low}");
    }

    #[test]
    fn profile_validation() {
        assert!(FaultProfile::default().validate().is_ok());
        let bad = FaultProfile {
            reserved_flag: 1.5,
            ..FaultProfile::default()
        };
        assert!(bad.validate().is_err());
        let overlapping = FaultProfile {
            protocol_flip: 0.7,
            protocol_unknown: 0.6,
            ..FaultProfile::default()
        };
        assert!(overlapping.validate().is_err());
        let nan = FaultProfile {
            fragment_offset: f64::NAN,
            ..FaultProfile::default()
        };
        assert!(nan.validate().is_err());
    }
}

use std::net::Ipv6Addr;

/// Size of the IPv6 pseudo-header prepended for upper-layer checksums.
pub const PSEUDO_HEADER_LEN: usize = 40;

/// Compute the internet checksum (RFC 1071) over `bytes`.
///
/// The span is summed as big-endian 16-bit words; a trailing odd byte is
/// treated as the high byte of a final word. Callers zero the checksum field
/// inside the span before calling and store the result afterwards.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in bytes.chunks(2) {
        let word = if chunk.len() == 2 {
            (chunk[0] as u32) << 8 | (chunk[1] as u32)
        } else {
            (chunk[0] as u32) << 8
        };
        // Fold as we go so very long spans cannot overflow the accumulator.
        sum = sum.wrapping_add(word);
        if sum > 0xFFFF_0000 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
    }
    sum = (sum & 0xFFFF) + (sum >> 16);
    sum = (sum & 0xFFFF) + (sum >> 16);
    !(sum as u16)
}

/// True when a span carrying its own checksum validates.
///
/// Summing the whole span, stored checksum included, must fold to all-ones,
/// which makes the complemented result zero.
pub fn verify(bytes: &[u8]) -> bool {
    checksum(bytes) == 0
}

/// Checksum an IPv6 upper-layer message (RFC 2460 section 8.1).
///
/// `upper_layer_length` is the length of the upper-layer message only. When
/// extension headers (e.g. Hop-by-Hop with Router Alert) precede the message
/// it differs from the IPv6 payload length.
pub fn pseudo_checksum(
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
    upper_layer_length: u32,
    next_header: u8,
    upper_layer: &[u8],
) -> u16 {
    let mut buf = Vec::with_capacity(PSEUDO_HEADER_LEN + upper_layer.len());
    buf.extend_from_slice(&src.octets());
    buf.extend_from_slice(&dst.octets());
    buf.extend_from_slice(&upper_layer_length.to_be_bytes());
    buf.extend_from_slice(&[0, 0, 0, next_header]);
    buf.extend_from_slice(upper_layer);
    checksum(&buf)
}

/// Zero the 16-bit field at `offset`, checksum `span`, and store the result.
pub(crate) fn store(span: &mut [u8], offset: usize) {
    span[offset] = 0;
    span[offset + 1] = 0;
    let cksum = checksum(span);
    span[offset..offset + 2].copy_from_slice(&cksum.to_be_bytes());
}

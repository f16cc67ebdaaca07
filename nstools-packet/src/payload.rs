/// Fill the first `size` bytes of `buffer` with the repeating pattern
/// `0x00, 0x01, .., 0xFF, 0x00, ..` (byte `i` holds `i mod 256`).
///
/// Panics if `size` exceeds the buffer length.
pub fn fill(buffer: &mut [u8], size: usize) {
    for (i, byte) in buffer[..size].iter_mut().enumerate() {
        *byte = (i & 0xFF) as u8;
    }
}

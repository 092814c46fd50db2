/// XORs `buf` with the 4 byte masking key, starting at key offset 0.
///
/// Masking is its own inverse, so the same call masks and unmasks.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        for (byte, key) in chunk.iter_mut().zip(mask) {
            *byte ^= key;
        }
    }
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_mask() {
        let mask = [0x6d, 0xb6, 0xb2, 0x80];
        let unmasked = [
            0xf3, 0x00, 0x01, 0x02, 0x03, 0x80, 0x81, 0x82, 0xff, 0xfe, 0x00,
        ];

        let mut masked = unmasked;
        apply_mask(&mut masked, mask);
        assert_eq!(
            masked,
            [0x9e, 0xb6, 0xb3, 0x82, 0x6e, 0x36, 0x33, 0x02, 0x92, 0x48, 0xb2]
        );

        apply_mask(&mut masked, mask);
        assert_eq!(masked, unmasked);
    }

    #[test]
    fn test_mask_edge_cases() {
        let mut empty: [u8; 0] = [];
        apply_mask(&mut empty, [1, 2, 3, 4]);

        let mut one = [0xAA];
        apply_mask(&mut one, [0xFF, 0, 0, 0]);
        assert_eq!(one, [0x55]);
    }
}

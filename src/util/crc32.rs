use crc32fast::Hasher;

const MASK_DELTA: u32 = 0xa282_ead8;

/// Returns the crc32 of `data`.
#[inline]
pub fn hash(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Returns the crc32 of `init` concatenated with `data`, where `init` is the
/// crc32 of some prefix.
#[inline]
pub fn extend(init: u32, data: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(init);
    hasher.update(data);
    hasher.finalize()
}

/// Returns a masked representation of `crc`.
///
/// Computing the crc of a string that contains embedded crcs is
/// problematic, so crcs are masked before they are stored.
#[inline]
pub fn mask(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Returns the crc whose masked representation is `masked`.
#[inline]
pub fn unmask(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

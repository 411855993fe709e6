//! Fixed-width and variable-width integer coding.
//!
//! All fixed-width values are little-endian. Varints use 7 bits per byte with
//! the high bit set on every byte except the last.

/// Append `v` as 4 little-endian bytes.
#[inline]
pub fn put_fixed_32(dst: &mut Vec<u8>, v: u32) {
    dst.extend_from_slice(&v.to_le_bytes())
}

/// Append `v` as 8 little-endian bytes.
#[inline]
pub fn put_fixed_64(dst: &mut Vec<u8>, v: u64) {
    dst.extend_from_slice(&v.to_le_bytes())
}

/// Write `v` into the first 4 bytes of `dst`.
///
/// # Panics
///
/// Panics if `dst` is shorter than 4 bytes.
#[inline]
pub fn encode_fixed_32(dst: &mut [u8], v: u32) {
    dst[..4].copy_from_slice(&v.to_le_bytes())
}

/// Write `v` into the first 8 bytes of `dst`.
///
/// # Panics
///
/// Panics if `dst` is shorter than 8 bytes.
#[inline]
pub fn encode_fixed_64(dst: &mut [u8], v: u64) {
    dst[..8].copy_from_slice(&v.to_le_bytes())
}

/// Decode a u32 from the first 4 bytes of `src`.
///
/// # Panics
///
/// Panics if `src` is shorter than 4 bytes.
#[inline]
pub fn decode_fixed_32(src: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&src[..4]);
    u32::from_le_bytes(buf)
}

/// Decode a u64 from the first 8 bytes of `src`.
///
/// # Panics
///
/// Panics if `src` is shorter than 8 bytes.
#[inline]
pub fn decode_fixed_64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_le_bytes(buf)
}

macro_rules! varint {
    ($name:ident, $uint:ty, $max_len:expr) => {
        pub struct $name;

        impl $name {
            /// Max bytes an encoded value can take.
            pub const MAX_VARINT_LEN: usize = $max_len;

            /// Append the varint form of `v` and return the number of bytes written.
            pub fn put_varint(dst: &mut Vec<u8>, mut v: $uint) -> usize {
                let start = dst.len();
                while v >= 0x80 {
                    dst.push((v as u8) | 0x80);
                    v >>= 7;
                }
                dst.push(v as u8);
                dst.len() - start
            }

            /// Append `s.len()` as a varint followed by `s`.
            pub fn put_varint_prefixed_slice(dst: &mut Vec<u8>, s: &[u8]) {
                Self::put_varint(dst, s.len() as $uint);
                dst.extend_from_slice(s);
            }

            /// Decode a varint from the front of `src`, returning the value and
            /// the bytes consumed. `None` if `src` is truncated or the value
            /// overflows.
            pub fn read(src: &[u8]) -> Option<($uint, usize)> {
                let mut n: $uint = 0;
                let mut shift: u32 = 0;
                for (i, &b) in src.iter().enumerate() {
                    if i >= Self::MAX_VARINT_LEN {
                        return None;
                    }
                    if b < 0x80 {
                        if shift > 0 && (b as $uint) >> (<$uint>::BITS - shift) != 0 {
                            return None;
                        }
                        return Some((n | ((b as $uint) << shift), i + 1));
                    }
                    n |= ((b & 0x7f) as $uint) << shift;
                    shift += 7;
                }
                None
            }

            /// Decode a varint and advance `src` past it.
            pub fn drain_read(src: &mut &[u8]) -> Option<$uint> {
                let (v, n) = Self::read(src)?;
                *src = &src[n..];
                Some(v)
            }

            /// Decode a length-prefixed slice and advance `src` past it.
            pub fn get_varint_prefixed_slice<'a>(src: &mut &'a [u8]) -> Option<&'a [u8]> {
                let (len, n) = Self::read(src)?;
                let len = len as usize;
                let rest: &'a [u8] = &src[n..];
                if rest.len() < len {
                    return None;
                }
                *src = &rest[len..];
                Some(&rest[..len])
            }
        }
    };
}

varint!(VarintU32, u32, 5);
varint!(VarintU64, u64, 10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_coding() {
        let mut tests = vec![0u64, 1, 255, 256, 1 << 32, u64::MAX - 1, u64::MAX];
        let mut buf = vec![];
        for v in tests.iter() {
            put_fixed_64(&mut buf, *v);
        }
        for (i, v) in tests.drain(..).enumerate() {
            assert_eq!(decode_fixed_64(&buf[i * 8..]), v);
        }
        let mut b32 = [0u8; 4];
        encode_fixed_32(&mut b32, 0xdead_beef);
        assert_eq!(b32, [0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(decode_fixed_32(&b32), 0xdead_beef);
    }

    #[test]
    fn test_varint_lengths() {
        let tests = vec![
            (0u64, 1usize),
            (127, 1),
            (128, 2),
            (16383, 2),
            (16384, 3),
            (1 << 50, 8),
            (u64::MAX, 10),
        ];
        for (v, expect) in tests {
            let mut buf = vec![];
            assert_eq!(VarintU64::put_varint(&mut buf, v), expect);
            assert_eq!(VarintU64::read(&buf), Some((v, expect)));
        }
    }

    #[test]
    fn test_varint_truncated_and_overflow() {
        let mut buf = vec![];
        VarintU32::put_varint(&mut buf, u32::MAX);
        assert!(VarintU32::read(&buf[..buf.len() - 1]).is_none());
        assert!(VarintU32::read(&[]).is_none());
        // 2^35 does not fit in a u32
        let mut big = vec![];
        VarintU64::put_varint(&mut big, 1 << 35);
        assert!(VarintU32::read(&big).is_none());
    }

    #[test]
    fn test_prefixed_slice_drain() {
        let mut buf = vec![];
        VarintU32::put_varint_prefixed_slice(&mut buf, b"hello");
        VarintU32::put_varint_prefixed_slice(&mut buf, b"");
        VarintU64::put_varint(&mut buf, 300);
        let mut src = buf.as_slice();
        assert_eq!(VarintU32::get_varint_prefixed_slice(&mut src), Some(&b"hello"[..]));
        assert_eq!(VarintU32::get_varint_prefixed_slice(&mut src), Some(&b""[..]));
        assert_eq!(VarintU64::drain_read(&mut src), Some(300));
        assert!(src.is_empty());

        let mut short: &[u8] = &[5, b'a', b'b'];
        assert!(VarintU32::get_varint_prefixed_slice(&mut short).is_none());
    }
}

use crate::util::coding::{decode_fixed_64, put_fixed_64, VarintU32};
use crate::util::comparator::Comparator;
use num_traits::FromPrimitive;
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};

/// The max key sequence number. The value is 2^56 - 1 because the sequence
/// number only takes 56 bits when it is serialized into an `InternalKey`.
pub const MAX_KEY_SEQUENCE: u64 = (1u64 << 56) - 1;

/// The tail bytes length of an internal key:
/// 7 bytes sequence number + 1 byte type number.
pub const INTERNAL_KEY_TAIL: usize = 8;

#[derive(Debug, Clone, Copy, Eq, PartialEq, FromPrimitive)]
pub enum ValueType {
    Deletion = 0x0,
    Value = 0x1,
}

/// The value type to use when seeking to a user key at a given sequence:
/// the highest type so it sorts first among entries with the same sequence.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

/// Compose the sequence number and value type into a single u64.
#[inline]
pub fn pack_sequence_and_type(seq: u64, value_type: ValueType) -> u64 {
    debug_assert!(
        seq <= MAX_KEY_SEQUENCE,
        "key sequence number should be less than {}, but got {}",
        MAX_KEY_SEQUENCE,
        seq
    );
    seq << 8 | value_type as u64
}

/// Returns the user key part of an encoded internal key.
///
/// # Panics
///
/// Panics if `ikey` is shorter than `INTERNAL_KEY_TAIL`.
#[inline]
pub fn extract_user_key(ikey: &[u8]) -> &[u8] {
    &ikey[..ikey.len() - INTERNAL_KEY_TAIL]
}

/// An `InternalKey` is a user key followed by 8 bytes packing the sequence
/// number and the value type:
///
/// ```text
///   +-----------------+---------------------------+
///   | user key bytes  | sequence (7)  |  type (1) |
///   +-----------------+---------------------------+
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct InternalKey {
    data: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], seq: u64, value_type: ValueType) -> Self {
        let mut data = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TAIL);
        data.extend_from_slice(user_key);
        put_fixed_64(&mut data, pack_sequence_and_type(seq, value_type));
        InternalKey { data }
    }

    /// Wrap an already encoded internal key. The bytes are not validated.
    #[inline]
    pub fn decoded_from(src: &[u8]) -> Self {
        InternalKey { data: src.to_vec() }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the user key part. An empty or malformed key yields an empty slice.
    #[inline]
    pub fn user_key(&self) -> &[u8] {
        if self.data.len() < INTERNAL_KEY_TAIL {
            return &[];
        }
        extract_user_key(&self.data)
    }

    pub fn parsed(&self) -> Option<ParsedInternalKey<'_>> {
        ParsedInternalKey::decode_from(&self.data)
    }
}

impl Debug for InternalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.parsed() {
            Some(parsed) => write!(f, "{:?}", parsed),
            None => write!(f, "(bad){:?}", self.data),
        }
    }
}

/// A borrowed, decoded view of an internal key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub seq: u64,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn new(user_key: &'a [u8], seq: u64, value_type: ValueType) -> Self {
        ParsedInternalKey {
            user_key,
            seq,
            value_type,
        }
    }

    /// Decode an internal key. Returns `None` if the key is too short or its
    /// type byte is unknown.
    pub fn decode_from(ikey: &'a [u8]) -> Option<Self> {
        if ikey.len() < INTERNAL_KEY_TAIL {
            return None;
        }
        let tail = decode_fixed_64(&ikey[ikey.len() - INTERNAL_KEY_TAIL..]);
        let value_type = ValueType::from_u64(tail & 0xff)?;
        Some(ParsedInternalKey {
            user_key: extract_user_key(ikey),
            seq: tail >> 8,
            value_type,
        })
    }

    pub fn encode(&self) -> InternalKey {
        InternalKey::new(self.user_key, self.seq, self.value_type)
    }
}

impl<'a> Debug for ParsedInternalKey<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "'{}' @ {} : {:?}",
            String::from_utf8_lossy(self.user_key),
            self.seq,
            self.value_type
        )
    }
}

/// A `LookupKey` represents a 'Get' request from the user by the give key with a
/// specific sequence number to perform a MVCC style query.
///
/// The format of a `LookupKey`:
///
/// ```text
///
///   +---------------------------------+
///   | varint32 of internal key length |
///   +---------------------------------+ --------------- user key start
///   | user key bytes                  |
///   +---------------------------------+   internal key
///   | sequence (7)        |  type (1) |
///   +---------------------------------+ ---------------
///
/// ```
pub struct LookupKey {
    data: Vec<u8>,
    user_key_start: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], seq: u64) -> Self {
        let mut data = vec![];
        let user_key_start =
            VarintU32::put_varint(&mut data, (user_key.len() + INTERNAL_KEY_TAIL) as u32);
        data.extend_from_slice(user_key);
        put_fixed_64(&mut data, pack_sequence_and_type(seq, VALUE_TYPE_FOR_SEEK));
        LookupKey {
            data,
            user_key_start,
        }
    }

    /// Return a key suitable for lookup in a memtable.
    pub fn mem_key(&self) -> &[u8] {
        &self.data
    }

    /// Return an internal key, suitable for passing to an internal iterator.
    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.user_key_start..]
    }

    /// Return the user key.
    pub fn user_key(&self) -> &[u8] {
        &self.data[self.user_key_start..self.data.len() - INTERNAL_KEY_TAIL]
    }
}

/// `InternalKeyComparator` orders internal keys by user key ascending, then by
/// sequence number descending, then by type descending, so the newest version
/// of a user key comes first.
#[derive(Clone, Default)]
pub struct InternalKeyComparator<C: Comparator> {
    pub user_comparator: C,
}

impl<C: Comparator> InternalKeyComparator<C> {
    pub fn new(user_comparator: C) -> Self {
        InternalKeyComparator { user_comparator }
    }
}

impl<C: Comparator> Comparator for InternalKeyComparator<C> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self
            .user_comparator
            .compare(extract_user_key(a), extract_user_key(b))
        {
            Ordering::Equal => {
                let sa = decode_fixed_64(&a[a.len() - INTERNAL_KEY_TAIL..]);
                let sb = decode_fixed_64(&b[b.len() - INTERNAL_KEY_TAIL..]);
                sb.cmp(&sa)
            }
            o => o,
        }
    }

    fn name(&self) -> &str {
        "routelsm.InternalKeyComparator"
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let mut tmp = self
            .user_comparator
            .find_shortest_separator(user_start, user_limit);
        if tmp.len() < user_start.len()
            && self.user_comparator.compare(user_start, &tmp) == Ordering::Less
        {
            // The user key became physically shorter but logically larger.
            // Tack on the earliest possible number to the shortened user key.
            put_fixed_64(
                &mut tmp,
                pack_sequence_and_type(MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK),
            );
            return tmp;
        }
        start.to_owned()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        let user_key = extract_user_key(key);
        let mut tmp = self.user_comparator.find_short_successor(user_key);
        if tmp.len() < user_key.len()
            && self.user_comparator.compare(user_key, &tmp) == Ordering::Less
        {
            put_fixed_64(
                &mut tmp,
                pack_sequence_and_type(MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK),
            );
            return tmp;
        }
        key.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::comparator::BytewiseComparator;

    fn ikey(user_key: &str, seq: u64, t: ValueType) -> Vec<u8> {
        InternalKey::new(user_key.as_bytes(), seq, t).data().to_vec()
    }

    #[test]
    fn test_internal_key_encode_decode() {
        let keys = vec!["", "k", "hello", "longggggggggggggggggggggg"];
        let seqs = vec![1, 2, 3, (1u64 << 8) - 1, 1 << 8, (1u64 << 32) + 1, MAX_KEY_SEQUENCE];
        for k in keys.iter() {
            for s in seqs.iter() {
                for t in &[ValueType::Value, ValueType::Deletion] {
                    let encoded = ikey(k, *s, *t);
                    let parsed = ParsedInternalKey::decode_from(&encoded).unwrap();
                    assert_eq!(parsed.user_key, k.as_bytes());
                    assert_eq!(parsed.seq, *s);
                    assert_eq!(parsed.value_type, *t);
                    assert_eq!(parsed.encode().data(), encoded.as_slice());
                }
            }
        }
        assert!(ParsedInternalKey::decode_from(b"bar").is_none());
        // unknown type byte
        let mut bad = ikey("foo", 1, ValueType::Value);
        let n = bad.len();
        bad[n - INTERNAL_KEY_TAIL] = 0x7;
        assert!(ParsedInternalKey::decode_from(&bad).is_none());
    }

    #[test]
    fn test_internal_key_ordering() {
        let icmp = InternalKeyComparator::new(BytewiseComparator::default());
        let mut tests = vec![
            (ikey("a", 1, ValueType::Value), ikey("b", 1, ValueType::Value), Ordering::Less),
            (ikey("a", 2, ValueType::Value), ikey("a", 1, ValueType::Value), Ordering::Less),
            (ikey("a", 1, ValueType::Value), ikey("a", 1, ValueType::Deletion), Ordering::Less),
            (ikey("a", 5, ValueType::Deletion), ikey("a", 5, ValueType::Deletion), Ordering::Equal),
            (ikey("b", 100, ValueType::Value), ikey("a", 1, ValueType::Value), Ordering::Greater),
        ];
        for (a, b, expect) in tests.drain(..) {
            assert_eq!(icmp.compare(&a, &b), expect);
        }
    }

    #[test]
    fn test_internal_key_shortest_separator() {
        let icmp = InternalKeyComparator::new(BytewiseComparator::default());
        let mut tests = vec![
            // When user keys are same
            (("foo", 100), ("foo", 99), ("foo", 100)),
            (("foo", 100), ("foo", 101), ("foo", 100)),
            (("foo", 100), ("foo", 100), ("foo", 100)),
            // When user keys are misordered
            (("foo", 100), ("bar", 99), ("foo", 100)),
            // When user keys are different, but correctly ordered
            (("foo", 100), ("hello", 200), ("g", MAX_KEY_SEQUENCE)),
            // When start user key is prefix of limit user key
            (("foo", 100), ("foobar", 200), ("foo", 100)),
            // When limit user key is prefix of start user key
            (("foobar", 100), ("foo", 200), ("foobar", 100)),
        ];
        for ((a, sa), (b, sb), (e, se)) in tests.drain(..) {
            let res = icmp.find_shortest_separator(
                &ikey(a, sa, ValueType::Value),
                &ikey(b, sb, ValueType::Value),
            );
            assert_eq!(res, ikey(e, se, ValueType::Value), "{} {}", a, b);
        }
    }

    #[test]
    fn test_internal_key_short_successor() {
        let icmp = InternalKeyComparator::new(BytewiseComparator::default());
        assert_eq!(
            icmp.find_short_successor(&ikey("foo", 100, ValueType::Value)),
            ikey("g", MAX_KEY_SEQUENCE, ValueType::Value)
        );
        let all_ff = InternalKey::new(&[0xff, 0xff], 100, ValueType::Value);
        assert_eq!(icmp.find_short_successor(all_ff.data()), all_ff.data().to_vec());
    }

    #[test]
    fn test_lookup_key() {
        let lk = LookupKey::new(b"user", 42);
        assert_eq!(lk.user_key(), b"user");
        let parsed = ParsedInternalKey::decode_from(lk.internal_key()).unwrap();
        assert_eq!(parsed.seq, 42);
        assert_eq!(parsed.value_type, VALUE_TYPE_FOR_SEEK);
        assert_eq!(lk.mem_key()[0] as usize, 4 + INTERNAL_KEY_TAIL);
    }
}

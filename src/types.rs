use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// Sequence numbers are packed into the low 56 bits of an 8-byte trailer,
/// leaving the low byte for the value type.
pub const MAX_SEQUENCE: u64 = (1 << 56) - 1;

/// Distinguishes puts from deletes in the storage engine.
/// A Delete writes a tombstone — the key isn't removed, it's marked as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueType {
    /// A normal put operation.
    Put = 0x01,
    /// A delete (tombstone marker).
    Delete = 0x02,
}

/// When seeking for "everything at `user_key` visible at sequence `s`", the
/// trailer must sort before every entry with sequence <= s. Trailers sort
/// descending, so the seek key carries the largest type tag.
pub const TYPE_FOR_SEEK: ValueType = ValueType::Delete;

impl ValueType {
    pub fn from_u8(v: u8) -> Result<ValueType> {
        match v {
            0x01 => Ok(ValueType::Put),
            0x02 => Ok(ValueType::Delete),
            other => Err(Error::corruption(format!("unknown value type {other:#04x}"))),
        }
    }
}

/// Internal key format: user key + sequence number + value type.
///
/// Ordering: (user_key ASC, sequence DESC, value_type DESC).
/// This ensures the newest version of a key always comes first during merging.
///
/// The sequence number is a monotonically increasing counter assigned to each
/// write operation. It provides a total ordering of all writes.
///
/// On disk and inside the skip list the three fields are packed as
/// `user_key ++ le64((sequence << 8) | value_type)`. The 8-byte trailer is
/// little-endian, so encoded keys are **not** bytewise comparable; use
/// [`internal_key_order`] wherever encoded keys are sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Key,
    pub sequence: u64,
    pub value_type: ValueType,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Key>, sequence: u64, value_type: ValueType) -> InternalKey {
        InternalKey { user_key: user_key.into(), sequence, value_type }
    }

    /// The key to seek with when looking up `user_key` at snapshot `sequence`:
    /// it sorts at or before every entry for `user_key` visible at that
    /// snapshot, and after every newer one.
    pub fn for_seek(user_key: impl Into<Key>, sequence: u64) -> InternalKey {
        InternalKey::new(user_key, sequence, TYPE_FOR_SEEK)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.user_key.len() + 8);
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.user_key);
        buf.extend_from_slice(&pack_tag(self.sequence, self.value_type).to_le_bytes());
    }

    pub fn decode(encoded: &[u8]) -> Result<InternalKey> {
        if encoded.len() < 8 {
            return Err(Error::corruption(format!(
                "internal key too short: {} bytes",
                encoded.len()
            )));
        }
        let (user_key, trailer) = encoded.split_at(encoded.len() - 8);
        let tag = u64::from_le_bytes(trailer.try_into().unwrap());
        Ok(InternalKey {
            user_key: user_key.to_vec(),
            sequence: tag >> 8,
            value_type: ValueType::from_u8((tag & 0xff) as u8)?,
        })
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &InternalKey) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| (other.value_type as u8).cmp(&(self.value_type as u8)))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &InternalKey) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub(crate) fn pack_tag(sequence: u64, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE);
    (sequence << 8) | value_type as u64
}

/// User-key portion of an encoded internal key.
///
/// The caller must have validated the buffer (at least 8 bytes).
pub fn user_key_of(encoded: &[u8]) -> &[u8] {
    debug_assert!(encoded.len() >= 8);
    &encoded[..encoded.len() - 8]
}

/// Packed `(sequence << 8) | type` trailer of an encoded internal key.
pub fn tag_of(encoded: &[u8]) -> u64 {
    debug_assert!(encoded.len() >= 8);
    let trailer = &encoded[encoded.len() - 8..];
    u64::from_le_bytes(trailer.try_into().unwrap())
}

pub fn sequence_of(encoded: &[u8]) -> u64 {
    tag_of(encoded) >> 8
}

/// Comparator over encoded keys. The engine threads this through the skip
/// list and block layers so they stay agnostic of the key encoding.
pub type Comparator = fn(&[u8], &[u8]) -> Ordering;

/// Plain bytewise ordering over user keys.
pub fn user_key_order(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Ordering over encoded internal keys: user key ascending, then trailer
/// descending (newest sequence first).
pub fn internal_key_order(a: &[u8], b: &[u8]) -> Ordering {
    user_key_of(a)
        .cmp(user_key_of(b))
        .then_with(|| tag_of(b).cmp(&tag_of(a)))
}

/// Outcome of a point lookup against one source (memtable, table, version).
///
/// `Deleted` is distinct from `Missing`: a tombstone must stop the search
/// from falling through to older sources that still hold a live value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Found(Value),
    Deleted,
    Missing,
}

//! Encodes a logical record key to the byte string the storage engine
//! orders and scans by.

use bytes::{BufMut, Bytes, BytesMut};

/// Value category. The discriminant becomes the encoded form's leading
/// byte so that iterating one category is a prefix scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueCategory {
    RawString = 0,
    Counter = 1,
    MapMeta = 2,
    MapData = 3,
    ListMeta = 4,
    ListData = 5,
    SetMeta = 6,
    SetData = 7,
    ZsetMeta = 8,
    ZsetData = 9,
}

/// A separator byte that never occurs inside a length-prefixed component,
/// since every component is introduced by its own 4-byte length.
const COLUMN_SEPARATOR: u8 = 0xff;

/// A logical record key: primary keys identify the record, column keys
/// optionally name a field inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalKey<'a> {
    pub category: ValueCategory,
    pub primary_keys: Vec<&'a [u8]>,
    pub column_keys: Vec<&'a [u8]>,
}

impl<'a> LogicalKey<'a> {
    pub fn new(category: ValueCategory, primary_keys: Vec<&'a [u8]>) -> Self {
        Self {
            category,
            primary_keys,
            column_keys: Vec::new(),
        }
    }

    pub fn with_column_keys(mut self, column_keys: Vec<&'a [u8]>) -> Self {
        self.column_keys = column_keys;
        self
    }

    /// Encode as an ordered byte string: `[category][len|part]*[0xff][len|part]*`.
    ///
    /// Sort order over the encoded form groups every entry of a record
    /// together (shared primary-key prefix) and, within a record, groups
    /// entries of the same category (shared leading byte).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.category as u8);
        for part in &self.primary_keys {
            buf.put_u32(part.len() as u32);
            buf.put_slice(part);
        }
        if !self.column_keys.is_empty() {
            buf.put_u8(COLUMN_SEPARATOR);
            for part in &self.column_keys {
                buf.put_u32(part.len() as u32);
                buf.put_slice(part);
            }
        }
        buf.freeze()
    }

    pub fn key_hash(&self) -> u64 {
        super::hash::key_hash(self.primary_keys.iter().copied())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encodes_category_as_leading_byte() {
        let key = LogicalKey::new(ValueCategory::Counter, vec![b"alice"]);
        assert_eq!(key.encode()[0], ValueCategory::Counter as u8);
    }

    #[test]
    fn encoding_groups_same_record_together() {
        let a = LogicalKey::new(ValueCategory::MapData, vec![b"alice"])
            .with_column_keys(vec![b"name"])
            .encode();
        let b = LogicalKey::new(ValueCategory::MapData, vec![b"alice"])
            .with_column_keys(vec![b"email"])
            .encode();
        // Shared prefix up to (and including) the separator.
        let shared = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
        assert!(shared >= 1 + 4 + 5 + 1);
    }

    #[test]
    fn distinct_primary_keys_hash_differently() {
        let a = LogicalKey::new(ValueCategory::RawString, vec![b"alice"]);
        let b = LogicalKey::new(ValueCategory::RawString, vec![b"bob"]);
        assert_ne!(a.key_hash(), b.key_hash());
    }
}

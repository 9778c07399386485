use std::{marker::PhantomData, ops::Range};

use rocksdb::DB;

use crate::store::StoreError;

use super::encdec::{Decode, Encode};

/// A logical table within the single column family. Each table owns a unique
/// one-byte tag which prefixes every key, so tables occupy disjoint,
/// contiguous key ranges.
pub trait Table {
    const TAG: u8;
    const PREFIX_LEN: usize = 1;

    /// Key type for the table.
    type Key: Encode + Decode;
    /// Value type for the table.
    type Value: Encode + Decode;

    /// Encodes the full key including the table tag.
    fn encode_key(key: &Self::Key) -> Vec<u8> {
        let mut enc = super::encdec::EncodeBuilder::new();
        enc = enc.append(&Self::TAG);
        enc = enc.append(key);
        enc.build()
    }

    /// Encodes a key range within the table, with optional start and end
    /// bounds. Missing bounds fall back to the edges of the table's tag
    /// range.
    fn encode_range(start: Option<&impl Encode>, to: Option<&impl Encode>) -> Range<Vec<u8>> {
        let prefix = vec![Self::TAG];
        let prefix_range = super::encdec::prefix_key_range(&prefix);

        let start_key = match start {
            Some(start) => {
                let mut enc = super::encdec::EncodeBuilder::new();
                enc = enc.append(&Self::TAG);
                enc = enc.append(start);
                enc.build()
            }
            None => prefix_range.start,
        };

        let end_key = match to {
            Some(to) => {
                let mut enc = super::encdec::EncodeBuilder::new();
                enc = enc.append(&Self::TAG);
                enc = enc.append(to);
                enc.build()
            }
            None => prefix_range.end,
        };

        start_key..end_key
    }

    /// The range covering every key of the table that starts with `prefix`
    /// (the prefix must itself be a valid encoded key fragment).
    fn encode_prefix_range(prefix: &impl Encode) -> Range<Vec<u8>> {
        let mut enc = super::encdec::EncodeBuilder::new();
        enc = enc.append(&Self::TAG);
        enc = enc.append(prefix);
        super::encdec::prefix_key_range(&enc.build())
    }
}

#[macro_export]
macro_rules! define_table {
    {
        name: $name:ident,
        key_type: $key_type:ty,
        value_type: $value_type:ty,
        tag: $tag:expr
    } => {
        pub struct $name;

        impl $crate::store::table::Table for $name {
            const TAG: u8 = $tag;
            type Key = $key_type;
            type Value = $value_type;
        }
    };
}

type RocksIterator<'a> = rocksdb::DBIteratorWithThreadMode<'a, DB>;

/// Decodes raw KV pairs from a rocksdb iterator into a table's key and value
/// types, stripping the tag prefix.
pub struct TableIterator<'a, T>(RocksIterator<'a>, PhantomData<T>);

impl<'a, T> TableIterator<'a, T> {
    pub fn new(inner: RocksIterator<'a>) -> Self {
        Self(inner, Default::default())
    }
}

impl<'a, T> Iterator for TableIterator<'a, T>
where
    T: Table,
{
    type Item = Result<(T::Key, T::Value), StoreError>;

    fn next(&mut self) -> Option<Result<(T::Key, T::Value), StoreError>> {
        match self.0.next() {
            Some(Ok((key, value))) => {
                let key_out = match T::Key::decode_all(&key[T::PREFIX_LEN..]) {
                    Ok(k) => k,
                    Err(e) => return Some(Err(e.into())),
                };

                let value_out = match T::Value::decode_all(&value[..]) {
                    Ok(v) => v,
                    Err(e) => return Some(Err(e.into())),
                };

                Some(Ok((key_out, value_out)))
            }
            Some(Err(err)) => Some(Err(err.into())),
            None => None,
        }
    }
}

//! Logical schema: the prefix-tagged tables making up the UTXO index.
//!
//! UTXO rows reference a small monotonic surrogate `tx_id` rather than the
//! 32-byte transaction hash. That keeps the hot `utxo` keys narrow and makes
//! the hash-to-id lookup during spend marking a single point read; the cost
//! is one extra lookup when materialising records for the read API.

use utxo_indexer_macros::{Decode, Encode};

use crate::define_table;
use crate::script::ScriptType;
use crate::store::ResumePoint;
use crate::store::encdec::{Decode as _, DecodingError, DecodingResult, Encode as _};

define_table! {
    name: SchemaVersionKV,
    key_type: (),
    value_type: u32,
    tag: b'M'
}

define_table! {
    name: ResumePointKV,
    key_type: (),
    value_type: ResumePoint,
    tag: b'R'
}

// next unallocated surrogate transaction id
define_table! {
    name: TxSequenceKV,
    key_type: (),
    value_type: u64,
    tag: b'Q'
}

define_table! {
    name: TxByIdKV,
    key_type: u64,
    value_type: TxRow,
    tag: b'T'
}

define_table! {
    name: TxIdByHashKV,
    key_type: [u8; 32],
    value_type: u64,
    tag: b'H'
}

// secondary index for UndoAbove: which transactions entered at which height
define_table! {
    name: TxIdByHeightKV,
    key_type: TxHeightKey,
    value_type: (),
    tag: b'G'
}

define_table! {
    name: UtxoKV,
    key_type: UtxoKey,
    value_type: UtxoRow,
    tag: b'U'
}

// secondary index for address lookup, kept only for address-indexed kinds
define_table! {
    name: ScriptIndexKV,
    key_type: ScriptIndexKey,
    value_type: (),
    tag: b'S'
}

// secondary index for undo resurrection and trimming of spent rows
define_table! {
    name: SpentByHeightKV,
    key_type: SpentKey,
    value_type: (),
    tag: b'X'
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct TxRow {
    pub height: u64,
    pub hash: [u8; 32],
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHeightKey {
    pub height: u64,
    pub tx_id: u64,
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtxoKey {
    pub tx_id: u64,
    pub vout: u32,
}

/// A UTXO row. The row is unspent iff `spent_height` is `None`; spent rows
/// are retained until trimmed so recent outgoing sums stay answerable.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct UtxoRow {
    pub value: i64,
    pub kind: ScriptType,
    pub script: Vec<u8>,
    pub spent_height: Option<u64>,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct ScriptIndexKey {
    pub kind: ScriptType,
    pub script: Vec<u8>,
    pub tx_id: u64,
    pub vout: u32,
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpentKey {
    pub height: u64,
    pub tx_id: u64,
    pub vout: u32,
}

// ScriptType travels in keys and rows as its stable single-byte value.

impl crate::store::encdec::Encode for ScriptType {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl crate::store::encdec::Decode for ScriptType {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (tag, rest) = u8::decode(bytes)?;

        match ScriptType::from_u8(tag) {
            Some(kind) => Ok((kind, rest)),
            None => Err(DecodingError::InvalidEnumKind(vec![tag])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::encdec::{Decode, Encode};

    #[test]
    fn utxo_row_round_trips() {
        let row = UtxoRow {
            value: 123_456_789,
            kind: ScriptType::P2PKH,
            script: vec![0xAA; 20],
            spent_height: Some(42),
        };

        let decoded = UtxoRow::decode_all(&row.encode()).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn script_index_key_orders_by_script_then_outpoint() {
        let a = ScriptIndexKey {
            kind: ScriptType::P2PKH,
            script: vec![0x01; 20],
            tx_id: 7,
            vout: 0,
        };
        let b = ScriptIndexKey {
            kind: ScriptType::P2PKH,
            script: vec![0x01; 20],
            tx_id: 7,
            vout: 1,
        };
        let c = ScriptIndexKey {
            kind: ScriptType::P2PKH,
            script: vec![0x02; 20],
            tx_id: 0,
            vout: 0,
        };

        assert!(a.encode() < b.encode());
        assert!(b.encode() < c.encode());
    }

    #[test]
    fn script_type_rejects_unknown_byte() {
        assert!(ScriptType::decode(&[0xFE]).is_err());
        let (kind, _) = ScriptType::decode(&[0x02]).unwrap();
        assert_eq!(kind, ScriptType::P2PKH);
    }
}

pub mod encdec;
pub mod rocks;
pub mod table;
pub mod tables;


use thiserror::Error;
use utxo_indexer_macros::{Decode, Encode};

use crate::script::ScriptType;

pub type BlockHeight = u64;

/// Identifies a single transaction output. `tx_hash` is the raw 32-byte hash
/// as the node emits it (the display form is byte-reversed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub tx_hash: [u8; 32],
    pub vout: u32,
}

impl OutPoint {
    pub fn new(tx_hash: [u8; 32], vout: u32) -> Self {
        Self { tx_hash, vout }
    }

    /// Fixed 36-byte form: hash followed by the big-endian output index.
    pub fn to_key(&self) -> [u8; 36] {
        let mut key = [0u8; 36];
        key[..32].copy_from_slice(&self.tx_hash);
        key[32..].copy_from_slice(&self.vout.to_be_bytes());
        key
    }
}

/// An unspent output at creation time, as handed to `CreateUTXOs`. The
/// `script` field is the compact payload produced by the script codec; its
/// meaning depends on `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub tx_hash: [u8; 32],
    pub vout: u32,
    pub value: i64,
    pub kind: ScriptType,
    pub script: Vec<u8>,
}

/// A stored UTXO as returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoRecord {
    pub tx_hash: [u8; 32],
    pub vout: u32,
    pub value: i64,
    pub kind: ScriptType,
    pub script: Vec<u8>,
    pub height: BlockHeight,
}

/// The single `(hash, height)` row naming the last fully committed block.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub hash: [u8; 32],
    pub height: BlockHeight,
}

/// Confirmation-sensitive balance sums for one address. `current` is
/// `available + incoming`, computed by the caller; it is carried here to keep
/// the response shape in one place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    pub available: i64,
    pub incoming: i64,
    pub outgoing: i64,
    pub current: i64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error("decoding error: {0}")]
    Decoding(#[from] encdec::DecodingError),

    #[error("storage error: {0}")]
    Other(String),
}

impl StoreError {
    /// Transient engine states worth retrying before giving up on a
    /// transaction.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;

        match err.kind() {
            ErrorKind::Busy | ErrorKind::TryAgain | ErrorKind::TimedOut => {
                StoreError::Conflict(err.to_string())
            }
            _ => StoreError::Other(err.to_string()),
        }
    }
}

/// The writer half of the store contract. Every method runs inside the
/// transaction scope supplied by [`Store::transact`]; nothing becomes visible
/// until that scope commits.
pub trait StoreTx {
    /// Writes the resume cursor. Callers invoke this last in every
    /// transaction so the cursor is the durability anchor for the whole
    /// event.
    fn set_resume_point(&mut self, point: &ResumePoint) -> Result<(), StoreError>;

    /// Inserts new UTXOs created at `height`.
    fn create_utxos(&mut self, utxos: &[Utxo], height: BlockHeight) -> Result<(), StoreError>;

    /// Marks UTXOs as spent at `height`. Outpoints that cannot be located are
    /// logged and skipped: inputs may legitimately reference outputs the
    /// deployment chose not to index (dust, masked-out classes).
    fn remove_utxos(&mut self, outpoints: &[OutPoint], height: BlockHeight)
    -> Result<(), StoreError>;

    /// Rolls back every effect above `height`: deletes UTXOs created above
    /// it and re-activates UTXOs spent above it.
    fn undo_above(&mut self, height: BlockHeight) -> Result<(), StoreError>;

    /// Permanently deletes UTXOs spent below `cutoff` and garbage-collects
    /// transaction rows left without children.
    fn trim_spent_utxos(&mut self, cutoff: BlockHeight) -> Result<(), StoreError>;
}

/// Engine-neutral store contract: a read-only view plus a transactional
/// writer. The reads observe a snapshot consistent as of some committed
/// resume cursor.
pub trait Store: Send + Sync {
    fn get_resume_point(&self) -> Result<Option<ResumePoint>, StoreError>;

    /// Height of the resume cursor, or 0 before the first block commits.
    fn get_current_height(&self) -> Result<BlockHeight, StoreError>;

    /// All unspent outputs locked to `script` under `kind`.
    fn find_utxos(&self, kind: ScriptType, script: &[u8]) -> Result<Vec<UtxoRecord>, StoreError>;

    /// The three confirmation-sensitive sums against the current resume
    /// height (`current` is left for the caller).
    fn get_balance(
        &self,
        kind: ScriptType,
        script: &[u8],
        confirmations: u64,
    ) -> Result<Balance, StoreError>;

    /// Runs `work` inside a transaction: begun before the closure, committed
    /// when it returns `Ok`, discarded when it returns `Err`. Transient
    /// conflicts are retried a bounded number of times, re-running the
    /// closure from scratch.
    fn transact(
        &self,
        work: &mut dyn FnMut(&mut dyn StoreTx) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}

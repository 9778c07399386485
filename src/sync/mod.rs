pub mod history;
pub mod indexer;
pub mod walker;

use std::time::Duration;

use crate::store::BlockHeight;

pub const ONE_DOGE: i64 = 100_000_000;

/// Outputs below this value are not worth indexing.
pub const DUST_LIMIT: i64 = ONE_DOGE / 100;

/// Back-off between retries after RPC or database errors.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Coinbase inputs carry an all-zero previous transaction hash.
pub const COINBASE_SENTINEL: [u8; 32] = [0u8; 32];

/// Length of a raw block or transaction hash.
pub const RAW_HASH_LEN: usize = 32;

/// One record of the upstream event stream. `height` and
/// `last_processed_block` name the resume point after this event is applied.
#[derive(Debug, Clone)]
pub struct BlockOrUndo {
    pub height: BlockHeight,
    pub last_processed_block: String,
    pub event: BlockEvent,
}

#[derive(Debug, Clone)]
pub enum BlockEvent {
    /// Forward apply of one block.
    Block(RawBlock),
    /// Roll back everything above `height`; the chain tip moved to a
    /// different branch.
    Undo,
    /// Nothing to do.
    Idle,
}

/// A block as the walker hands it over: transaction hashes and previous
/// outpoints in raw byte order, scripts raw, values in koinu.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub hash: String,
    pub height: BlockHeight,
    pub txs: Vec<RawTx>,
}

#[derive(Debug, Clone)]
pub struct RawTx {
    pub txid: [u8; 32],
    pub inputs: Vec<RawInput>,
    pub outputs: Vec<RawOutput>,
}

#[derive(Debug, Clone)]
pub struct RawInput {
    pub prev_hash: [u8; 32],
    pub vout: u32,
}

#[derive(Debug, Clone)]
pub struct RawOutput {
    pub value: i64,
    pub script: Vec<u8>,
}

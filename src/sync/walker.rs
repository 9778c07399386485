//! Minimal block walker: polls the node over JSON-RPC, follows the chain
//! from the store's resume point and feeds the indexer an ordered stream of
//! block and undo events.
//!
//! Dogecoin blocks carry AuxPoW headers which the `bitcoin` consensus
//! decoder rejects, so blocks are fetched in verbose form (`getblock
//! <hash> 2`) and mapped from JSON. The walker keeps a bounded tail of
//! recently emitted points; a parent-hash mismatch walks that tail against
//! the node's chain to find the fork point and emits a single undo.

use std::collections::VecDeque;

use bitcoincore_rpc::{Auth, Client, RpcApi};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::error::Error;
use crate::store::{BlockHeight, ResumePoint};
use crate::sync::{
    BlockEvent, BlockOrUndo, COINBASE_SENTINEL, ONE_DOGE, RAW_HASH_LEN, RETRY_DELAY, RawBlock,
    RawInput, RawOutput, RawTx,
};

/// How many recently emitted points to remember for fork detection. Reorgs
/// deeper than this require a manual re-sync from a lower starting height.
const TAIL_LIMIT: usize = 128;

pub struct WalkerConfig {
    pub rpc_host: String,
    pub rpc_port: u16,
    pub rpc_user: String,
    pub rpc_pass: String,
    pub poll_interval: std::time::Duration,
    /// First height to index when the store has no resume cursor.
    pub starting_height: BlockHeight,
}

pub struct Walker {
    client: Client,
    events: mpsc::UnboundedSender<BlockOrUndo>,
    shutdown: watch::Receiver<bool>,
    poll_interval: std::time::Duration,
    /// Recently emitted `(height, display-hex hash)` points, oldest first.
    tail: VecDeque<(BlockHeight, String)>,
    next_height: BlockHeight,
}

impl Walker {
    /// `resume` is the store's cursor; the walk continues after it, or from
    /// `starting_height` on a fresh database.
    pub fn new(
        config: WalkerConfig,
        resume: Option<ResumePoint>,
        events: mpsc::UnboundedSender<BlockOrUndo>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, Error> {
        let url = format!("http://{}:{}", config.rpc_host, config.rpc_port);
        let client = Client::new(&url, Auth::UserPass(config.rpc_user, config.rpc_pass))
            .map_err(|e| Error::Walker(e.to_string()))?;

        let mut tail = VecDeque::new();
        let next_height = match resume {
            Some(point) => {
                tail.push_back((point.height, hex::encode(point.hash)));
                point.height + 1
            }
            None => config.starting_height,
        };

        Ok(Self {
            client,
            events,
            shutdown,
            poll_interval: config.poll_interval,
            tail,
            next_height,
        })
    }

    pub async fn run(mut self) {
        info!("walking the chain from height {}", self.next_height);

        while !self.stopping() {
            match self.step() {
                Ok(advanced) => {
                    if !advanced {
                        self.pause(self.poll_interval).await;
                    }
                }
                Err(err) => {
                    warn!("walker error (will retry): {err}");
                    self.pause(RETRY_DELAY).await;
                }
            }
        }

        info!("walker stopped");
    }

    /// Fetches and emits at most one block. Returns false when the walk is
    /// at the node's tip and should pause before polling again.
    fn step(&mut self) -> Result<bool, Error> {
        let tip: u64 = self.rpc("getblockcount", &[])?;

        if self.next_height > tip {
            return Ok(false);
        }

        let hash: String = self.rpc("getblockhash", &[json!(self.next_height)])?;
        let block: VerboseBlock = self.rpc("getblock", &[json!(hash), json!(2)])?;

        let reorganized = match (&block.previousblockhash, self.tail.back()) {
            (Some(prev), Some((_, last_hash))) => prev != last_hash,
            _ => false,
        };
        if reorganized {
            self.emit_undo_to_fork()?;
            return Ok(true);
        }

        let height = block.height;
        let display_hash = block.hash.clone();
        let raw = convert_block(block)?;

        self.send(BlockOrUndo {
            height,
            last_processed_block: display_hash.clone(),
            event: BlockEvent::Block(raw),
        })?;

        self.tail.push_back((height, display_hash));
        while self.tail.len() > TAIL_LIMIT {
            self.tail.pop_front();
        }
        self.next_height = height + 1;

        Ok(true)
    }

    /// The node's chain no longer extends our last emitted block: walk the
    /// tail newest-first until a point still on the node's chain, emit one
    /// undo down to it, and continue forward from there.
    fn emit_undo_to_fork(&mut self) -> Result<(), Error> {
        while let Some((height, hash)) = self.tail.back().cloned() {
            let node_hash: String = self.rpc("getblockhash", &[json!(height)])?;

            if node_hash == hash {
                info!("chain reorganized; rolling back to height {height}");
                self.send(BlockOrUndo {
                    height,
                    last_processed_block: hash,
                    event: BlockEvent::Undo,
                })?;
                self.next_height = height + 1;
                return Ok(());
            }

            self.tail.pop_back();
        }

        // reorg deeper than the remembered tail: roll back to just below the
        // oldest point we knew and let the forward walk converge
        let below = self.next_height.saturating_sub(TAIL_LIMIT as u64 + 1);
        let node_hash: String = self.rpc("getblockhash", &[json!(below)])?;

        warn!("reorg deeper than walker tail; rolling back to height {below}");
        self.send(BlockOrUndo {
            height: below,
            last_processed_block: node_hash.clone(),
            event: BlockEvent::Undo,
        })?;

        self.tail.push_back((below, node_hash));
        self.next_height = below + 1;

        Ok(())
    }

    fn send(&self, event: BlockOrUndo) -> Result<(), Error> {
        self.events
            .send(event)
            .map_err(|_| Error::Walker("event channel closed".into()))
    }

    /// The RPC client is synchronous; yield the runtime thread while it
    /// blocks on the network.
    fn rpc<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: &[serde_json::Value],
    ) -> Result<T, Error> {
        tokio::task::block_in_place(|| self.client.call(method, params))
            .map_err(|e| Error::Walker(e.to_string()))
    }

    async fn pause(&mut self, duration: std::time::Duration) {
        tokio::select! {
            _ = self.shutdown.changed() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }
}

// Verbose-JSON shapes from `getblock <hash> 2`; only the consumed fields.

#[derive(Deserialize)]
struct VerboseBlock {
    hash: String,
    height: u64,
    #[serde(default)]
    previousblockhash: Option<String>,
    tx: Vec<VerboseTx>,
}

#[derive(Deserialize)]
struct VerboseTx {
    txid: String,
    vin: Vec<VerboseInput>,
    vout: Vec<VerboseOutput>,
}

#[derive(Deserialize)]
struct VerboseInput {
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    vout: Option<u32>,
    #[serde(default)]
    coinbase: Option<String>,
}

#[derive(Deserialize)]
struct VerboseOutput {
    value: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: VerboseScriptPubKey,
}

#[derive(Deserialize)]
struct VerboseScriptPubKey {
    hex: String,
}

fn convert_block(block: VerboseBlock) -> Result<RawBlock, Error> {
    let mut txs = Vec::with_capacity(block.tx.len());

    for tx in block.tx {
        let txid = decode_hash_reversed(&tx.txid)?;

        let mut inputs = Vec::with_capacity(tx.vin.len());
        for input in tx.vin {
            if input.coinbase.is_some() {
                inputs.push(RawInput {
                    prev_hash: COINBASE_SENTINEL,
                    vout: u32::MAX,
                });
                continue;
            }

            let (Some(prev_txid), Some(vout)) = (&input.txid, input.vout) else {
                return Err(Error::Walker(format!(
                    "input without prevout in tx {}",
                    tx.txid
                )));
            };

            inputs.push(RawInput {
                prev_hash: decode_hash_reversed(prev_txid)?,
                vout,
            });
        }

        let mut outputs = Vec::with_capacity(tx.vout.len());
        for output in tx.vout {
            outputs.push(RawOutput {
                value: koinu_from_decimal(output.value),
                script: hex::decode(&output.script_pub_key.hex)
                    .map_err(|e| Error::Walker(format!("bad script hex: {e}")))?,
            });
        }

        txs.push(RawTx {
            txid,
            inputs,
            outputs,
        });
    }

    Ok(RawBlock {
        hash: block.hash,
        height: block.height,
        txs,
    })
}

/// Hashes appear in RPC JSON in display order; stored outpoint keys use the
/// raw byte order the node computes, so reverse while decoding.
fn decode_hash_reversed(hash_hex: &str) -> Result<[u8; 32], Error> {
    let mut bytes = hex::decode(hash_hex).map_err(|e| Error::Walker(e.to_string()))?;

    if bytes.len() != RAW_HASH_LEN {
        return Err(Error::Walker(format!(
            "hash '{hash_hex}' is {} bytes, expected {RAW_HASH_LEN}",
            bytes.len()
        )));
    }

    bytes.reverse();
    Ok(bytes.try_into().expect("length checked"))
}

/// The verbose form reports values in whole coins; convert to koinu.
fn koinu_from_decimal(value: f64) -> i64 {
    (value * ONE_DOGE as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_display_hashes_into_raw_order() {
        let display = "00000000000000000000000000000000000000000000000000000000000000ff";
        let raw = decode_hash_reversed(display).unwrap();
        assert_eq!(raw[0], 0xFF);
        assert_eq!(raw[31], 0x00);

        assert!(decode_hash_reversed("abcd").is_err());
        assert!(decode_hash_reversed("zz").is_err());
    }

    #[test]
    fn converts_decimal_values_to_koinu() {
        assert_eq!(koinu_from_decimal(0.0), 0);
        assert_eq!(koinu_from_decimal(0.01), 1_000_000);
        assert_eq!(koinu_from_decimal(1.0), ONE_DOGE);
        assert_eq!(koinu_from_decimal(420.69), 42_069_000_000);
    }

    #[test]
    fn converts_verbose_blocks() {
        let block: VerboseBlock = serde_json::from_value(json!({
            "hash": "aa".repeat(32),
            "height": 7,
            "previousblockhash": "bb".repeat(32),
            "tx": [
                {
                    "txid": "cc".repeat(32),
                    "vin": [{ "coinbase": "04ffff001d0104" }],
                    "vout": [
                        { "value": 10.0, "scriptPubKey": { "hex": "76a914" } }
                    ]
                },
                {
                    "txid": "dd".repeat(32),
                    "vin": [{ "txid": "cc".repeat(32), "vout": 0 }],
                    "vout": [
                        { "value": 9.5, "scriptPubKey": { "hex": "" } }
                    ]
                }
            ]
        }))
        .unwrap();

        let raw = convert_block(block).unwrap();
        assert_eq!(raw.height, 7);
        assert_eq!(raw.txs.len(), 2);

        assert_eq!(raw.txs[0].inputs[0].prev_hash, COINBASE_SENTINEL);
        assert_eq!(raw.txs[0].outputs[0].value, 10 * ONE_DOGE);
        assert_eq!(raw.txs[0].outputs[0].script, vec![0x76, 0xA9, 0x14]);

        assert_eq!(raw.txs[1].inputs[0].prev_hash, [0xCC; 32]);
        assert_eq!(raw.txs[1].inputs[0].vout, 0);
        assert_eq!(raw.txs[1].outputs[0].value, 9 * ONE_DOGE + ONE_DOGE / 2);
    }
}

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::script::{ScriptMask, ScriptType, classify};
use crate::store::{BlockHeight, OutPoint, ResumePoint, Store, Utxo};
use crate::sync::history::{BlockHistory, BlockStats};
use crate::sync::{BlockEvent, BlockOrUndo, COINBASE_SENTINEL, DUST_LIMIT, RAW_HASH_LEN, RETRY_DELAY, RawBlock};

/// Single consumer of the walker's event stream and the only writer to the
/// store. Each event becomes exactly one store transaction which also writes
/// the resume cursor, so a crash either loses the event entirely (the walker
/// re-emits it) or preserves it whole.
pub struct Indexer<S> {
    store: Arc<S>,
    events: mpsc::UnboundedReceiver<BlockOrUndo>,
    script_mask: ScriptMask,
    trim_spent_after: u64,
    trim_interval: u64,
    trim_counter: u64,
    history: Arc<BlockHistory>,
    shutdown: watch::Receiver<bool>,
}

impl<S: Store> Indexer<S> {
    pub fn new(
        store: Arc<S>,
        events: mpsc::UnboundedReceiver<BlockOrUndo>,
        script_mask: ScriptMask,
        trim_spent_after: u64,
        trim_interval: u64,
        history: Arc<BlockHistory>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            events,
            script_mask,
            trim_spent_after,
            trim_interval,
            trim_counter: 0,
            history,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }

        info!("indexer stopped");
    }

    async fn handle(&mut self, event: BlockOrUndo) {
        let hash = match decode_resume_hash(&event.last_processed_block) {
            Ok(hash) => hash,
            Err(reason) => {
                warn!(
                    "malformed resume hash '{}': {reason}",
                    event.last_processed_block
                );
                self.backoff().await;
                return;
            }
        };

        let point = ResumePoint {
            hash,
            height: event.height,
        };

        match event.event {
            BlockEvent::Block(block) => self.apply_block(point, block).await,
            BlockEvent::Undo => self.undo_to(point).await,
            BlockEvent::Idle => {}
        }

        self.maybe_trim(event.height);
    }

    /// Applies one block: collect spends and retained outputs, then commit
    /// them with the new cursor in a single transaction.
    async fn apply_block(&mut self, point: ResumePoint, block: RawBlock) {
        let started = Instant::now();

        let mut to_remove: Vec<OutPoint> = Vec::new();
        let mut to_create: Vec<Utxo> = Vec::new();

        for tx in &block.txs {
            for input in &tx.inputs {
                if input.prev_hash != COINBASE_SENTINEL {
                    to_remove.push(OutPoint::new(input.prev_hash, input.vout));
                }
            }

            for (vout, output) in tx.outputs.iter().enumerate() {
                if output.value >= DUST_LIMIT {
                    let (kind, payload) = classify(&output.script, self.script_mask);
                    if kind != ScriptType::None {
                        to_create.push(Utxo {
                            tx_hash: tx.txid,
                            vout: vout as u32,
                            value: output.value,
                            kind,
                            script: payload,
                        });
                    }
                }
            }
        }

        info!("[{}] {}", point.height, block.hash);

        // We cannot admit failure here: skipping the event would diverge the
        // index from chain state, so keep trying until the store recovers or
        // we are told to stop. Creates go first so a within-block spend of a
        // fresh output lands on an existing row.
        loop {
            if self.stopping() {
                return;
            }

            let result = self.store.transact(&mut |tx| {
                if !to_create.is_empty() {
                    tx.create_utxos(&to_create, point.height)?;
                }
                if !to_remove.is_empty() {
                    tx.remove_utxos(&to_remove, point.height)?;
                }
                tx.set_resume_point(&point)
            });

            match result {
                Ok(()) => break,
                Err(err) => {
                    warn!("commit failed (will retry): {err}");
                    self.backoff().await;
                }
            }
        }

        self.history.record(BlockStats {
            height: block.height,
            hash: block.hash,
            time: unix_now(),
            tx_count: block.txs.len(),
            utxo_created: to_create.len(),
            utxo_spent: to_remove.len(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        });
    }

    async fn undo_to(&mut self, point: ResumePoint) {
        info!("[{}] undo to {}", point.height, hex::encode(point.hash));

        loop {
            if self.stopping() {
                return;
            }

            let result = self.store.transact(&mut |tx| {
                tx.undo_above(point.height)?;
                tx.set_resume_point(&point)
            });

            match result {
                Ok(()) => break,
                Err(err) => {
                    warn!("undo commit failed (will retry): {err}");
                    self.backoff().await;
                }
            }
        }
    }

    /// Every `trim_interval` events, drop UTXOs spent deeper than the
    /// configured reorg safety margin. Failures leave the index correct,
    /// just larger, so they are logged and forgotten.
    fn maybe_trim(&mut self, height: BlockHeight) {
        self.trim_counter += 1;
        if self.trim_counter < self.trim_interval {
            return;
        }
        self.trim_counter = 0;

        let cutoff = height.saturating_sub(self.trim_spent_after);
        if cutoff <= 1 {
            return;
        }

        if let Err(err) = self.store.transact(&mut |tx| tx.trim_spent_utxos(cutoff)) {
            warn!("trim below {cutoff} failed: {err}");
        }
    }

    async fn backoff(&mut self) {
        tokio::select! {
            _ = self.shutdown.changed() => {}
            _ = tokio::time::sleep(RETRY_DELAY) => {}
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }
}

fn decode_resume_hash(hash_hex: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(hash_hex).map_err(|e| e.to_string())?;

    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| format!("expected {RAW_HASH_LEN} bytes, got {}", bytes.len()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptMask;
    use crate::store::rocks::RocksStore;
    use crate::sync::{ONE_DOGE, RawInput, RawOutput, RawTx};
    use tempfile::TempDir;

    fn p2pkh(hash: u8) -> Vec<u8> {
        let mut script = vec![0x76, 0xA9, 20];
        script.extend_from_slice(&[hash; 20]);
        script.extend_from_slice(&[0x88, 0xAC]);
        script
    }

    fn block_event(height: u64, txs: Vec<RawTx>) -> BlockOrUndo {
        let hash = format!("{height:064x}");
        BlockOrUndo {
            height,
            last_processed_block: hash.clone(),
            event: BlockEvent::Block(RawBlock { hash, height, txs }),
        }
    }

    fn coinbase_tx(txid: u8, value: i64, script: Vec<u8>) -> RawTx {
        RawTx {
            txid: [txid; 32],
            inputs: vec![RawInput {
                prev_hash: COINBASE_SENTINEL,
                vout: u32::MAX,
            }],
            outputs: vec![RawOutput { value, script }],
        }
    }

    async fn run_events(store: Arc<RocksStore>, events: Vec<BlockOrUndo>) -> Arc<BlockHistory> {
        let (tx, rx) = mpsc::unbounded_channel();
        // the sender must outlive the run; a dropped watch sender reads as
        // an immediate shutdown
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let history = Arc::new(BlockHistory::new());

        let indexer = Indexer::new(
            store,
            rx,
            ScriptMask::STANDARD,
            100,
            100,
            history.clone(),
            shutdown_rx,
        );

        for event in events {
            tx.send(event).unwrap();
        }
        drop(tx);

        indexer.run().await;
        drop(shutdown_tx);
        history
    }

    #[tokio::test]
    async fn applies_blocks_and_advances_cursor() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path().to_path_buf(), false).unwrap());

        let spend_then_pay = RawTx {
            txid: [0x02; 32],
            inputs: vec![RawInput {
                prev_hash: [0x01; 32],
                vout: 0,
            }],
            outputs: vec![RawOutput {
                value: 4 * ONE_DOGE,
                script: p2pkh(0xBB),
            }],
        };

        let history = run_events(
            store.clone(),
            vec![
                block_event(1, vec![coinbase_tx(0x01, 5 * ONE_DOGE, p2pkh(0xAA))]),
                block_event(2, vec![spend_then_pay]),
            ],
        )
        .await;

        assert_eq!(store.get_current_height().unwrap(), 2);

        // the coinbase output was spent by block 2
        assert!(store.find_utxos(ScriptType::P2PKH, &[0xAA; 20]).unwrap().is_empty());
        let found = store.find_utxos(ScriptType::P2PKH, &[0xBB; 20]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, 4 * ONE_DOGE);

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].height, 2);
        assert_eq!(snapshot[0].utxo_created, 1);
        assert_eq!(snapshot[0].utxo_spent, 1);
    }

    #[tokio::test]
    async fn dust_and_masked_outputs_still_advance_cursor() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path().to_path_buf(), false).unwrap());

        let mut op_return = vec![0x6A];
        op_return.extend_from_slice(b"wow");

        run_events(
            store.clone(),
            vec![block_event(
                1,
                vec![
                    coinbase_tx(0x01, DUST_LIMIT - 1, p2pkh(0xAA)),
                    coinbase_tx(0x02, ONE_DOGE, op_return),
                ],
            )],
        )
        .await;

        // nothing indexed, cursor still moved
        assert_eq!(store.get_current_height().unwrap(), 1);
        assert!(store.find_utxos(ScriptType::P2PKH, &[0xAA; 20]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn undo_event_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path().to_path_buf(), false).unwrap());

        let undo = BlockOrUndo {
            height: 1,
            last_processed_block: format!("{:064x}", 1),
            event: BlockEvent::Undo,
        };

        run_events(
            store.clone(),
            vec![
                block_event(1, vec![coinbase_tx(0x01, ONE_DOGE, p2pkh(0xAA))]),
                block_event(2, vec![coinbase_tx(0x02, ONE_DOGE, p2pkh(0xAA))]),
                undo,
            ],
        )
        .await;

        assert_eq!(store.get_current_height().unwrap(), 1);
        let found = store.find_utxos(ScriptType::P2PKH, &[0xAA; 20]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tx_hash, [0x01; 32]);
    }

    #[tokio::test]
    async fn malformed_resume_hash_does_not_advance() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path().to_path_buf(), false).unwrap());

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let history = Arc::new(BlockHistory::new());

        let indexer = Indexer::new(
            store.clone(),
            rx,
            ScriptMask::STANDARD,
            100,
            100,
            history,
            shutdown_rx,
        );

        tx.send(BlockOrUndo {
            height: 9,
            last_processed_block: "not-hex".into(),
            event: BlockEvent::Idle,
        })
        .unwrap();

        // unblock the back-off sleep, then let the loop drain
        let runner = tokio::spawn(indexer.run());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        drop(tx);
        runner.await.unwrap();

        assert_eq!(store.get_current_height().unwrap(), 0);
    }
}

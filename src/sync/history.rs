use std::collections::VecDeque;
use std::sync::RwLock;

use serde::Serialize;

/// How many recently processed blocks the telemetry ring keeps.
pub const HISTORY_CAPACITY: usize = 10;

/// Per-block processing telemetry. This is observability, not state: the
/// ring is rebuilt from nothing on every restart.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BlockStats {
    pub height: u64,
    pub hash: String,
    /// Unix seconds at which the block was applied.
    pub time: u64,
    pub tx_count: usize,
    pub utxo_created: usize,
    pub utxo_spent: usize,
    pub processing_time_ms: u64,
}

/// Bounded most-recent-first ring of block stats. The indexer holds the
/// write lock briefly per event; readers take a copy.
#[derive(Default)]
pub struct BlockHistory {
    ring: RwLock<VecDeque<BlockStats>>,
}

impl BlockHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stats: BlockStats) {
        let mut ring = self.ring.write().expect("history lock");
        ring.push_front(stats);
        ring.truncate(HISTORY_CAPACITY);
    }

    /// Most-recent-first copy of the ring.
    pub fn snapshot(&self) -> Vec<BlockStats> {
        self.ring.read().expect("history lock").iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(height: u64) -> BlockStats {
        BlockStats {
            height,
            hash: format!("{height:064x}"),
            time: 1_700_000_000 + height,
            tx_count: 1,
            utxo_created: 2,
            utxo_spent: 1,
            processing_time_ms: 3,
        }
    }

    #[test]
    fn keeps_most_recent_first() {
        let history = BlockHistory::new();
        for h in 1..=3 {
            history.record(stats(h));
        }

        let snapshot = history.snapshot();
        let heights: Vec<u64> = snapshot.iter().map(|s| s.height).collect();
        assert_eq!(heights, vec![3, 2, 1]);
    }

    #[test]
    fn caps_at_capacity() {
        let history = BlockHistory::new();
        for h in 0..25 {
            history.record(stats(h));
        }

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), HISTORY_CAPACITY);
        assert_eq!(snapshot[0].height, 24);
        assert_eq!(snapshot.last().unwrap().height, 15);
    }
}

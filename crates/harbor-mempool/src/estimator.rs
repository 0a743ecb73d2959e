//! Fee and priority estimation from confirmation history.
//!
//! Tracks entries while they wait in the pool; when a block confirms them,
//! their fee rate and priority are filed under the number of blocks the
//! confirmation took. Estimates answer "what fee rate (priority) got
//! entries confirmed within N blocks" with the median of the relevant
//! history. Deliberately narrow: the pool is the only caller, always under
//! the pool lock.

use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};

use tracing::debug;

use harbor_core::amount::FeeRate;
use harbor_core::types::Hash256;

use crate::entry::TxMempoolEntry;

/// Deepest confirmation horizon tracked.
const MAX_CONFIRM_BLOCKS: usize = 25;

/// Samples kept per confirmation bucket; oldest are dropped first.
const SAMPLES_PER_BUCKET: usize = 200;

/// Minimum samples before an estimate is quoted.
const MIN_SAMPLES: usize = 11;

/// In-flight record of a pool transaction awaiting confirmation.
#[derive(Debug, Clone, Copy)]
struct TrackedTx {
    height: u32,
    fee_rate: FeeRate,
    priority: f64,
}

/// Snapshot body persisted by [`FeeEstimator::write`].
#[derive(bincode::Encode, bincode::Decode)]
struct SnapshotBody {
    fee_buckets: Vec<Vec<FeeRate>>,
    priority_buckets: Vec<Vec<f64>>,
    best_height: u32,
}

/// Confirmation-bucket fee and priority estimator.
pub struct FeeEstimator {
    min_relay_fee: FeeRate,
    tracked: BTreeMap<Hash256, TrackedTx>,
    /// `fee_buckets[k]` holds fee rates of entries confirmed in `k + 1` blocks.
    fee_buckets: Vec<VecDeque<FeeRate>>,
    priority_buckets: Vec<VecDeque<f64>>,
    best_height: u32,
}

impl FeeEstimator {
    /// Create an estimator; rates below `min_relay_fee` are never quoted.
    pub fn new(min_relay_fee: FeeRate) -> Self {
        Self {
            min_relay_fee,
            tracked: BTreeMap::new(),
            fee_buckets: vec![VecDeque::new(); MAX_CONFIRM_BLOCKS],
            priority_buckets: vec![VecDeque::new(); MAX_CONFIRM_BLOCKS],
            best_height: 0,
        }
    }

    /// Start tracking a newly admitted pool transaction.
    ///
    /// `current_estimate` is false while the node is catching up with the
    /// chain; such entries carry no signal and are ignored.
    pub fn process_transaction(&mut self, entry: &TxMempoolEntry, current_estimate: bool) {
        if !current_estimate {
            return;
        }
        self.tracked.insert(
            entry.hash(),
            TrackedTx {
                height: entry.height(),
                fee_rate: FeeRate::from_fee(entry.fee(), entry.tx_size()),
                priority: entry.priority(entry.height()),
            },
        );
    }

    /// File confirmation results for the entries a new block confirmed.
    pub fn process_block(
        &mut self,
        block_height: u32,
        entries: &[TxMempoolEntry],
        current_estimate: bool,
    ) {
        self.best_height = self.best_height.max(block_height);
        for entry in entries {
            let Some(tracked) = self.tracked.remove(&entry.hash()) else {
                continue;
            };
            if !current_estimate {
                continue;
            }
            let blocks = block_height.saturating_sub(tracked.height).max(1) as usize;
            let bucket = blocks.min(MAX_CONFIRM_BLOCKS) - 1;
            push_capped(&mut self.fee_buckets[bucket], tracked.fee_rate);
            push_capped(&mut self.priority_buckets[bucket], tracked.priority);
        }
    }

    /// Stop tracking an entry that left the pool unconfirmed.
    pub fn remove_tx(&mut self, hash: &Hash256) {
        self.tracked.remove(hash);
    }

    /// Fee rate expected to confirm within `n_blocks`, if enough history.
    pub fn estimate_fee(&self, n_blocks: usize) -> Option<FeeRate> {
        let n = n_blocks.clamp(1, MAX_CONFIRM_BLOCKS);
        let mut samples: Vec<FeeRate> = self.fee_buckets[..n]
            .iter()
            .flatten()
            .copied()
            .collect();
        if samples.len() < MIN_SAMPLES {
            return None;
        }
        samples.sort_unstable();
        let median = samples[samples.len() / 2];
        Some(median.max(self.min_relay_fee))
    }

    /// Priority expected to confirm within `n_blocks`, if enough history.
    pub fn estimate_priority(&self, n_blocks: usize) -> Option<f64> {
        let n = n_blocks.clamp(1, MAX_CONFIRM_BLOCKS);
        let mut samples: Vec<f64> = self.priority_buckets[..n]
            .iter()
            .flatten()
            .copied()
            .collect();
        if samples.len() < MIN_SAMPLES {
            return None;
        }
        samples.sort_unstable_by(f64::total_cmp);
        Some(samples[samples.len() / 2])
    }

    /// Serialize the confirmation history (not the in-flight set).
    pub fn write(&self, out: &mut impl Write) -> Result<(), bincode::error::EncodeError> {
        let body = SnapshotBody {
            fee_buckets: self
                .fee_buckets
                .iter()
                .map(|b| b.iter().copied().collect())
                .collect(),
            priority_buckets: self
                .priority_buckets
                .iter()
                .map(|b| b.iter().copied().collect())
                .collect(),
            best_height: self.best_height,
        };
        bincode::encode_into_std_write(&body, out, bincode::config::standard())?;
        Ok(())
    }

    /// Replace the confirmation history with a previously written snapshot.
    pub fn read(&mut self, input: &mut impl Read) -> Result<(), bincode::error::DecodeError> {
        let body: SnapshotBody =
            bincode::decode_from_std_read(input, bincode::config::standard())?;
        self.fee_buckets = vec![VecDeque::new(); MAX_CONFIRM_BLOCKS];
        self.priority_buckets = vec![VecDeque::new(); MAX_CONFIRM_BLOCKS];
        for (i, bucket) in body.fee_buckets.into_iter().take(MAX_CONFIRM_BLOCKS).enumerate() {
            self.fee_buckets[i] = bucket.into_iter().collect();
        }
        for (i, bucket) in body
            .priority_buckets
            .into_iter()
            .take(MAX_CONFIRM_BLOCKS)
            .enumerate()
        {
            self.priority_buckets[i] = bucket.into_iter().collect();
        }
        self.best_height = body.best_height;
        debug!(best_height = self.best_height, "loaded fee estimator snapshot");
        Ok(())
    }
}

fn push_capped<T>(bucket: &mut VecDeque<T>, value: T) {
    if bucket.len() == SAMPLES_PER_BUCKET {
        bucket.pop_front();
    }
    bucket.push_back(value);
}

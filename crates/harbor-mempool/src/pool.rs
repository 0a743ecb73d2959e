//! The in-memory pool of unconfirmed transactions and certificates.
//!
//! One primary table per payload kind, plus secondary indices: spent
//! outpoints, shielded nullifiers, per-sidechain aggregates, operator fee
//! deltas, and the recently-added queue for wallet sync. Every secondary
//! table stores hashes and is updated in the same critical section as the
//! primary tables; a single mutex guards the whole structure and no
//! operation suspends while holding it.
//!
//! Admission is unchecked by design: the external validator performs all
//! script, proof, and contextual checks first, and the read-only
//! `check_incoming_*_conflicts` pre-checks cover structural conflicts.
//! Internal inconsistencies discovered while mutating are programming
//! errors and panic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::{Read, Write};
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use harbor_core::amount::Amount;
use harbor_core::constants::{CLIENT_VERSION, ESTIMATES_MIN_VERSION};
use harbor_core::error::{AdmissionError, EstimatorError};
use harbor_core::traits::ChainView;
use harbor_core::types::{
    Certificate, Coins, Hash256, InputLocator, OutPoint, ScId, SidechainState, Transaction,
    TxInput,
};

use crate::config::MempoolConfig;
use crate::entry::{CertMempoolEntry, MempoolPayload, TxMempoolEntry};
use crate::estimator::FeeEstimator;
use crate::sidechains::SidechainMempoolEntry;

/// Payloads evicted by a removal, in removal order: every entry's
/// descendants precede it.
#[derive(Debug, Default)]
pub struct RemovedEntries {
    pub txs: Vec<Arc<Transaction>>,
    pub certs: Vec<Arc<Certificate>>,
}

impl RemovedEntries {
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty() && self.certs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.txs.len() + self.certs.len()
    }
}

/// Borrowed view over either payload kind; lets the DAG walks and removal
/// paths treat in-pool entries and external block payloads uniformly.
#[derive(Clone, Copy)]
enum PayloadRef<'a> {
    Tx(&'a Transaction),
    Cert(&'a Certificate),
}

impl<'a> PayloadRef<'a> {
    fn from_payload(payload: &'a MempoolPayload) -> Self {
        match payload {
            MempoolPayload::Tx(tx) => Self::Tx(tx),
            MempoolPayload::Cert(cert) => Self::Cert(cert),
        }
    }

    fn hash(&self) -> Hash256 {
        match self {
            Self::Tx(tx) => tx.hash(),
            Self::Cert(cert) => cert.hash(),
        }
    }

    fn inputs(&self) -> &'a [TxInput] {
        match self {
            Self::Tx(tx) => &tx.inputs,
            Self::Cert(cert) => &cert.inputs,
        }
    }

    fn output_count(&self) -> usize {
        match self {
            Self::Tx(tx) => tx.outputs.len(),
            Self::Cert(cert) => cert.outputs.len(),
        }
    }

    fn as_tx(&self) -> Option<&'a Transaction> {
        match self {
            Self::Tx(tx) => Some(tx),
            Self::Cert(_) => None,
        }
    }
}

/// All pool state; lives behind the [`Mempool`] mutex.
struct PoolInner {
    map_tx: BTreeMap<Hash256, TxMempoolEntry>,
    map_cert: BTreeMap<Hash256, CertMempoolEntry>,
    /// Spent outpoint -> locator of the pool entry spending it.
    map_next_tx: BTreeMap<OutPoint, InputLocator>,
    /// Shielded nullifier -> pool transaction claiming it.
    map_nullifiers: BTreeMap<Hash256, Hash256>,
    map_sidechains: BTreeMap<ScId, SidechainMempoolEntry>,
    /// Operator-applied (priority, fee) biases by hash.
    map_deltas: BTreeMap<Hash256, (f64, Amount)>,
    /// Payloads not yet reported to wallet listeners.
    recently_added: BTreeMap<Hash256, Arc<MempoolPayload>>,
    recently_added_sequence: u64,
    notified_sequence: u64,
    total_tx_size: usize,
    total_cert_size: usize,
    cached_inner_usage: usize,
    transactions_updated: u64,
    certificates_updated: u64,
    estimator: FeeEstimator,
}

impl PoolInner {
    fn new(config: &MempoolConfig) -> Self {
        Self {
            map_tx: BTreeMap::new(),
            map_cert: BTreeMap::new(),
            map_next_tx: BTreeMap::new(),
            map_nullifiers: BTreeMap::new(),
            map_sidechains: BTreeMap::new(),
            map_deltas: BTreeMap::new(),
            recently_added: BTreeMap::new(),
            recently_added_sequence: 0,
            notified_sequence: 0,
            total_tx_size: 0,
            total_cert_size: 0,
            cached_inner_usage: 0,
            transactions_updated: 0,
            certificates_updated: 0,
            estimator: FeeEstimator::new(config.min_relay_fee),
        }
    }

    fn exists(&self, hash: &Hash256) -> bool {
        self.map_tx.contains_key(hash) || self.map_cert.contains_key(hash)
    }

    fn payload_of(&self, hash: &Hash256) -> Option<MempoolPayload> {
        if let Some(entry) = self.map_tx.get(hash) {
            return Some(MempoolPayload::Tx(Arc::clone(entry.tx())));
        }
        self.map_cert
            .get(hash)
            .map(|entry| MempoolPayload::Cert(Arc::clone(entry.cert())))
    }

    fn payload_ref(&self, hash: &Hash256) -> Option<PayloadRef<'_>> {
        if let Some(entry) = self.map_tx.get(hash) {
            return Some(PayloadRef::Tx(entry.tx()));
        }
        self.map_cert
            .get(hash)
            .map(|entry| PayloadRef::Cert(entry.cert()))
    }

    fn has_sidechain_creation_tx(&self, sc_id: &ScId) -> bool {
        self.map_sidechains
            .get(sc_id)
            .is_some_and(|row| row.sc_creation_tx.is_some())
    }

    fn have_csw_nullifier(&self, sc_id: &ScId, nullifier: &Hash256) -> bool {
        self.map_sidechains
            .get(sc_id)
            .is_some_and(|row| row.csw_nullifiers.contains_key(nullifier))
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    fn add_tx(
        &mut self,
        entry: TxMempoolEntry,
        current_estimate: bool,
        cert_data_hashes: &BTreeMap<ScId, Hash256>,
    ) {
        let hash = entry.hash();
        let tx = Arc::clone(entry.tx());

        self.recently_added
            .insert(hash, Arc::new(MempoolPayload::Tx(Arc::clone(&tx))));
        self.recently_added_sequence += 1;

        for (i, input) in tx.inputs.iter().enumerate() {
            self.map_next_tx.insert(
                input.previous_output,
                InputLocator { spender: hash, vin_index: i as u32 },
            );
        }

        for js in &tx.joinsplits {
            for nf in &js.nullifiers {
                self.map_nullifiers.insert(*nf, hash);
            }
        }

        for csw in &tx.csw_inputs {
            let row = self.map_sidechains.entry(csw.sc_id).or_default();
            row.csw_nullifiers.insert(csw.nullifier, hash);
            row.csw_total_amount += csw.value;
            debug!(tx = %hash, sc = %csw.sc_id, "tracking csw nullifier");
        }

        for sc in &tx.sc_creations {
            debug!(tx = %hash, sc = %sc.sc_id, "tracking sidechain creation");
            self.map_sidechains.entry(sc.sc_id).or_default().sc_creation_tx = Some(hash);
        }

        for fwd in &tx.forward_transfers {
            self.map_sidechains
                .entry(fwd.sc_id)
                .or_default()
                .fwd_tx_hashes
                .insert(hash);
        }

        for btr in &tx.btr_requests {
            let row = self.map_sidechains.entry(btr.sc_id).or_default();
            row.btr_tx_hashes.insert(hash);
            if row.btr_cert_data_hash.is_none() {
                let snapshot = cert_data_hashes
                    .get(&btr.sc_id)
                    .copied()
                    .expect("missing active-cert-data-hash snapshot for btr sidechain");
                row.btr_cert_data_hash = Some(snapshot);
            }
        }

        self.transactions_updated += 1;
        self.total_tx_size += entry.tx_size();
        self.cached_inner_usage += entry.usage_size();
        self.estimator.process_transaction(&entry, current_estimate);

        let previous = self.map_tx.insert(hash, entry);
        assert!(previous.is_none(), "transaction {hash} added twice");
        debug!(tx = %hash, "added to mempool");
    }

    fn add_cert(&mut self, entry: CertMempoolEntry, current_estimate: bool) {
        let hash = entry.hash();
        let cert = Arc::clone(entry.cert());

        self.recently_added
            .insert(hash, Arc::new(MempoolPayload::Cert(Arc::clone(&cert))));
        self.recently_added_sequence += 1;

        for (i, input) in cert.inputs.iter().enumerate() {
            self.map_next_tx.insert(
                input.previous_output,
                InputLocator { spender: hash, vin_index: i as u32 },
            );
        }

        let row = self.map_sidechains.entry(cert.sc_id).or_default();
        assert!(
            !row.backward_certificates.contains_key(&cert.quality),
            "two pool certificates at quality {} for sidechain {}",
            cert.quality,
            cert.sc_id
        );
        row.backward_certificates.insert(cert.quality, hash);

        self.certificates_updated += 1;
        self.total_cert_size += entry.cert_size();
        self.cached_inner_usage += entry.usage_size();
        // The estimator is not consulted: certificates ride at maximum
        // priority and carry no fee signal.
        let _ = current_estimate;

        let previous = self.map_cert.insert(hash, entry);
        assert!(previous.is_none(), "certificate {hash} added twice");
        debug!(cert = %hash, quality = cert.quality, "added to mempool");
    }

    // ------------------------------------------------------------------
    // DAG traversal
    // ------------------------------------------------------------------

    /// Direct in-pool ancestors: owners of spent prevouts, plus (for a
    /// transaction) the unconfirmed creation of any sidechain its forward
    /// transfers or BTRs target.
    fn direct_ancestors(&self, payload: PayloadRef<'_>) -> Vec<Hash256> {
        let mut res = Vec::new();
        for input in payload.inputs() {
            let owner = input.previous_output.txid;
            if self.exists(&owner) {
                res.push(owner);
            }
        }
        if let Some(tx) = payload.as_tx() {
            let targeted = tx
                .forward_transfers
                .iter()
                .map(|fwd| fwd.sc_id)
                .chain(tx.btr_requests.iter().map(|btr| btr.sc_id));
            for sc_id in targeted {
                if let Some(row) = self.map_sidechains.get(&sc_id) {
                    if let Some(creation) = row.sc_creation_tx {
                        res.push(creation);
                    }
                }
            }
        }
        res
    }

    /// Ancestor closure, breadth-first, in discovery order.
    fn ancestors_closure(&self, root: PayloadRef<'_>) -> Vec<Hash256> {
        let mut order = Vec::new();
        let mut seen: BTreeSet<Hash256> = BTreeSet::new();
        let mut queue: VecDeque<Hash256> = self.direct_ancestors(root).into();
        while let Some(hash) = queue.pop_front() {
            if !seen.insert(hash) {
                continue;
            }
            order.push(hash);
            if let Some(payload) = self.payload_ref(&hash) {
                for ancestor in self.direct_ancestors(payload) {
                    if !seen.contains(&ancestor) {
                        queue.push_back(ancestor);
                    }
                }
            }
        }
        order
    }

    /// Direct in-pool descendants: spenders of the payload's outputs, plus
    /// (for a sidechain-creation transaction) every forward transfer and
    /// BTR targeting the created sidechains.
    fn direct_descendants(&self, payload: PayloadRef<'_>, hash: &Hash256) -> Vec<Hash256> {
        let mut res = Vec::new();
        for index in 0..payload.output_count() as u32 {
            if let Some(locator) = self.map_next_tx.get(&OutPoint { txid: *hash, index }) {
                res.push(locator.spender);
            }
        }
        if let Some(tx) = payload.as_tx() {
            for sc in &tx.sc_creations {
                if let Some(row) = self.map_sidechains.get(&sc.sc_id) {
                    res.extend(row.fwd_tx_hashes.iter().copied());
                    res.extend(row.btr_tx_hashes.iter().copied());
                }
            }
        }
        res
    }

    /// Descendant closure, depth-first pre-order.
    fn descendants_closure(&self, root: PayloadRef<'_>, root_hash: &Hash256) -> Vec<Hash256> {
        let mut order = Vec::new();
        let mut seen: BTreeSet<Hash256> = BTreeSet::new();
        seen.insert(*root_hash);
        let mut stack = self.direct_descendants(root, root_hash);
        stack.reverse();
        while let Some(hash) = stack.pop() {
            if !seen.insert(hash) {
                continue;
            }
            order.push(hash);
            if let Some(payload) = self.payload_ref(&hash) {
                let children = self.direct_descendants(payload, &hash);
                for child in children.into_iter().rev() {
                    if !seen.contains(&child) {
                        stack.push(child);
                    }
                }
            }
        }
        order
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Remove `root` (and, recursively, its descendant closure) from the
    /// pool. Descendants are erased before their ancestors and appended to
    /// `removed` in erasure order. The root itself need not be in the pool.
    fn remove_ref(&mut self, root: PayloadRef<'_>, recursive: bool, removed: &mut RemovedEntries) {
        let root_hash = root.hash();
        let descendants = if recursive {
            self.descendants_closure(root, &root_hash)
        } else {
            Vec::new()
        };
        for hash in descendants.iter().rev() {
            self.erase_any(hash, removed);
        }
        self.erase_any(&root_hash, removed);
    }

    fn remove_by_hash(&mut self, hash: &Hash256, recursive: bool, removed: &mut RemovedEntries) {
        let Some(payload) = self.payload_of(hash) else {
            return;
        };
        self.remove_ref(PayloadRef::from_payload(&payload), recursive, removed);
    }

    fn erase_any(&mut self, hash: &Hash256, removed: &mut RemovedEntries) {
        if self.map_tx.contains_key(hash) {
            self.erase_tx(hash, removed);
        } else if self.map_cert.contains_key(hash) {
            self.erase_cert(hash, removed);
        }
    }

    /// Erase one transaction and every secondary-index row referencing it.
    fn erase_tx(&mut self, hash: &Hash256, removed: &mut RemovedEntries) {
        let Some(entry) = self.map_tx.remove(hash) else {
            return;
        };
        self.recently_added.remove(hash);
        let tx = Arc::clone(entry.tx());

        for input in &tx.inputs {
            self.map_next_tx.remove(&input.previous_output);
        }
        for js in &tx.joinsplits {
            for nf in &js.nullifiers {
                self.map_nullifiers.remove(nf);
            }
        }

        for csw in &tx.csw_inputs {
            let row = self
                .map_sidechains
                .get_mut(&csw.sc_id)
                .expect("csw sidechain row missing on erase");
            row.csw_nullifiers.remove(&csw.nullifier);
            row.csw_total_amount -= csw.value;
            self.erase_sidechain_if_null(&csw.sc_id);
        }

        for btr in &tx.btr_requests {
            // Guard against double-delete on multiple BTRs toward the same
            // sidechain in one transaction.
            if let Some(row) = self.map_sidechains.get_mut(&btr.sc_id) {
                row.btr_tx_hashes.remove(hash);
                if row.btr_tx_hashes.is_empty() {
                    row.btr_cert_data_hash = None;
                }
                self.erase_sidechain_if_null(&btr.sc_id);
            }
        }

        for fwd in &tx.forward_transfers {
            if let Some(row) = self.map_sidechains.get_mut(&fwd.sc_id) {
                row.fwd_tx_hashes.remove(hash);
                self.erase_sidechain_if_null(&fwd.sc_id);
            }
        }

        for sc in &tx.sc_creations {
            let row = self
                .map_sidechains
                .get_mut(&sc.sc_id)
                .expect("sidechain row missing for creation on erase");
            row.sc_creation_tx = None;
            self.erase_sidechain_if_null(&sc.sc_id);
        }

        self.total_tx_size -= entry.tx_size();
        self.cached_inner_usage -= entry.usage_size();
        self.transactions_updated += 1;
        self.estimator.remove_tx(hash);
        removed.txs.push(tx);
        debug!(tx = %hash, "removed from mempool");
    }

    /// Erase one certificate and its sidechain-row reference.
    fn erase_cert(&mut self, hash: &Hash256, removed: &mut RemovedEntries) {
        let Some(entry) = self.map_cert.remove(hash) else {
            return;
        };
        self.recently_added.remove(hash);
        let cert = Arc::clone(entry.cert());

        for input in &cert.inputs {
            self.map_next_tx.remove(&input.previous_output);
        }

        let row = self
            .map_sidechains
            .get_mut(&cert.sc_id)
            .expect("sidechain row missing for certificate on erase");
        row.erase_cert(hash);
        self.erase_sidechain_if_null(&cert.sc_id);

        self.total_cert_size -= entry.cert_size();
        self.cached_inner_usage -= entry.usage_size();
        self.certificates_updated += 1;
        removed.certs.push(cert);
        debug!(cert = %hash, "removed from mempool");
    }

    fn erase_sidechain_if_null(&mut self, sc_id: &ScId) {
        if self.map_sidechains.get(sc_id).is_some_and(|row| row.is_null()) {
            debug!(sc = %sc_id, "erasing empty sidechain row");
            self.map_sidechains.remove(sc_id);
        }
    }

    // ------------------------------------------------------------------
    // Conflict and block-driven removal
    // ------------------------------------------------------------------

    /// Recursively remove every pool entry sharing an outpoint, shielded
    /// nullifier, or CSW nullifier with `tx`.
    fn remove_conflicts_tx(&mut self, tx: &Transaction, removed: &mut RemovedEntries) {
        let tx_hash = tx.hash();

        for input in &tx.inputs {
            let conflicting = self
                .map_next_tx
                .get(&input.previous_output)
                .map(|locator| locator.spender);
            if let Some(spender) = conflicting {
                if spender != tx_hash {
                    debug!(evicted = %spender, winner = %tx_hash, "double-spend conflict");
                    self.remove_by_hash(&spender, true, removed);
                }
            }
        }

        for js in &tx.joinsplits {
            for nf in &js.nullifiers {
                let conflicting = self.map_nullifiers.get(nf).copied();
                if let Some(spender) = conflicting {
                    if spender != tx_hash {
                        self.remove_by_hash(&spender, true, removed);
                    }
                }
            }
        }

        for csw in &tx.csw_inputs {
            let conflicting = self
                .map_sidechains
                .get(&csw.sc_id)
                .and_then(|row| row.csw_nullifiers.get(&csw.nullifier))
                .copied();
            if let Some(spender) = conflicting {
                // A tracked CSW nullifier always belongs to a pool tx.
                assert!(
                    self.map_tx.contains_key(&spender),
                    "csw nullifier owner {spender} not in pool"
                );
                if spender != tx_hash {
                    self.remove_by_hash(&spender, true, removed);
                }
            }
        }
    }

    /// Recursively remove entries conflicting with a confirmed certificate:
    /// double spends of its inputs, and every pool certificate for the same
    /// (sidechain, epoch) whose quality does not exceed it.
    fn remove_conflicts_cert(&mut self, cert: &Certificate, removed: &mut RemovedEntries) {
        let cert_hash = cert.hash();

        for input in &cert.inputs {
            let conflicting = self
                .map_next_tx
                .get(&input.previous_output)
                .map(|locator| locator.spender);
            if let Some(spender) = conflicting {
                if spender != cert_hash {
                    debug!(evicted = %spender, winner = %cert_hash, "double-spend conflict");
                    self.remove_by_hash(&spender, true, removed);
                }
            }
        }

        let superseded: Vec<Hash256> = match self.map_sidechains.get(&cert.sc_id) {
            None => Vec::new(),
            Some(row) => row
                .backward_certificates
                .values()
                .filter(|hash| {
                    let pool_cert = self
                        .map_cert
                        .get(hash)
                        .expect("backward-certificate table points at missing cert")
                        .cert();
                    pool_cert.epoch_number == cert.epoch_number
                        && pool_cert.quality <= cert.quality
                })
                .copied()
                .collect(),
        };

        for hash in superseded {
            // Dependencies between certs: one may already be gone.
            if self.map_cert.contains_key(&hash) {
                debug!(evicted = %hash, winner = %cert_hash, "superseded by confirmed certificate");
                self.remove_by_hash(&hash, true, removed);
            }
        }
    }

    /// Block connect, transaction side: drop confirmed entries
    /// non-recursively (their in-pool descendants remain valid), evict
    /// everything their confirmation invalidates, and feed the estimator.
    fn remove_for_block_txs(
        &mut self,
        block_txs: &[Transaction],
        block_height: u32,
        current_estimate: bool,
    ) -> RemovedEntries {
        let confirmed: Vec<TxMempoolEntry> = block_txs
            .iter()
            .filter_map(|tx| self.map_tx.get(&tx.hash()).cloned())
            .collect();
        self.estimator
            .process_block(block_height, &confirmed, current_estimate);

        let mut conflicting = RemovedEntries::default();
        for tx in block_txs {
            let mut confirmed_out = RemovedEntries::default();
            self.remove_ref(PayloadRef::Tx(tx), false, &mut confirmed_out);
            self.remove_conflicts_tx(tx, &mut conflicting);
            self.map_deltas.remove(&tx.hash());
        }
        conflicting
    }

    /// Block connect, certificate side.
    fn remove_for_block_certs(&mut self, block_certs: &[Certificate]) -> RemovedEntries {
        let mut conflicting = RemovedEntries::default();
        for cert in block_certs {
            let mut confirmed_out = RemovedEntries::default();
            self.remove_ref(PayloadRef::Cert(cert), false, &mut confirmed_out);
            self.remove_conflicts_cert(cert, &mut conflicting);
            self.map_deltas.remove(&cert.hash());
        }
        conflicting
    }

    // ------------------------------------------------------------------
    // Chain-event sweeps
    // ------------------------------------------------------------------

    /// Whether every input of `tx` is either an in-pool entry (certificate
    /// change is fine) or a mature committed coin.
    fn tx_expenditures_mature(&self, tx: &Transaction, view: &dyn ChainView) -> bool {
        self.expenditures_mature(&tx.inputs, view)
    }

    fn cert_expenditures_mature(&self, cert: &Certificate, view: &dyn ChainView) -> bool {
        self.expenditures_mature(&cert.inputs, view)
    }

    fn expenditures_mature(&self, inputs: &[TxInput], view: &dyn ChainView) -> bool {
        for input in inputs {
            let prev = &input.previous_output;
            if self.map_tx.contains_key(&prev.txid) {
                continue;
            }
            if let Some(entry) = self.map_cert.get(&prev.txid) {
                // Only change outputs of an unconfirmed certificate are
                // spendable; backward transfers must mature on chain first.
                assert!(
                    !entry.cert().is_backward_transfer(prev.index),
                    "pool entry spends unconfirmed backward transfer {prev}"
                );
                continue;
            }
            let Some(coins) = view.get_coins(&prev.txid) else {
                return false;
            };
            if (coins.is_coinbase || coins.from_cert)
                && !coins.is_output_mature(prev.index, view.height() + 1)
            {
                return false;
            }
        }
        true
    }

    /// Chain-tip change: evict entries whose premises no longer hold.
    fn remove_stale(&mut self, view: &dyn ChainView) -> RemovedEntries {
        let mut stale: BTreeSet<Hash256> = BTreeSet::new();

        for (hash, entry) in &self.map_tx {
            let tx = entry.tx();

            if !self.tx_expenditures_mature(tx, view) {
                stale.insert(*hash);
                continue;
            }

            // The committed view knows nothing of pool-resident creations,
            // so those are exempt from chain-side timing.
            for fwd in &tx.forward_transfers {
                if !self.has_sidechain_creation_tx(&fwd.sc_id)
                    && !view.check_sc_tx_timing(&fwd.sc_id)
                {
                    stale.insert(*hash);
                }
            }
            for btr in &tx.btr_requests {
                if !self.has_sidechain_creation_tx(&btr.sc_id)
                    && !view.check_sc_tx_timing(&btr.sc_id)
                {
                    stale.insert(*hash);
                }
            }

            for csw in &tx.csw_inputs {
                if view.sidechain_state(&csw.sc_id) != SidechainState::Ceased {
                    stale.insert(*hash);
                }
            }
        }

        // BTRs bound to an outdated active-cert-data-hash snapshot.
        for (sc_id, row) in &self.map_sidechains {
            if !row.btr_tx_hashes.is_empty()
                && view.active_cert_data_hash(sc_id) != row.btr_cert_data_hash
            {
                stale.extend(row.btr_tx_hashes.iter().copied());
            }
        }

        let mut stale_certs: BTreeSet<Hash256> = BTreeSet::new();
        for (hash, entry) in &self.map_cert {
            let cert = entry.cert();
            if !self.cert_expenditures_mature(cert, view) {
                stale_certs.insert(*hash);
                continue;
            }
            if !view.check_cert_timing(&cert.sc_id, cert.epoch_number) {
                stale_certs.insert(*hash);
            }
        }

        let mut removed = RemovedEntries::default();
        for hash in stale.iter().chain(stale_certs.iter()) {
            // Dependencies may have taken an entry out already.
            self.remove_by_hash(hash, true, &mut removed);
        }
        if !removed.is_empty() {
            debug!(
                txs = removed.txs.len(),
                certs = removed.certs.len(),
                "removed stale entries"
            );
        }
        removed
    }

    /// Evict every CSW-bearing transaction of any sidechain whose pending
    /// withdrawals exceed its committed balance. A conflict here means a
    /// broken or malicious withdrawal circuit, so the whole sidechain's
    /// CSWs go.
    fn remove_out_of_sc_balance_csw(&mut self, view: &dyn ChainView) -> RemovedEntries {
        let mut to_remove: BTreeSet<Hash256> = BTreeSet::new();
        for (sc_id, row) in &self.map_sidechains {
            if row.csw_total_amount == 0 {
                continue;
            }
            let sidechain = view
                .get_sidechain(sc_id)
                .expect("sidechain with pending csw missing from chain view");
            if row.csw_total_amount <= sidechain.balance {
                continue;
            }
            warn!(
                sc = %sc_id,
                pending = row.csw_total_amount,
                balance = sidechain.balance,
                "pending csw exceeds sidechain balance, evicting"
            );
            to_remove.extend(row.csw_nullifiers.values().copied());
        }

        let mut removed = RemovedEntries::default();
        for hash in &to_remove {
            self.remove_by_hash(hash, true, &mut removed);
        }
        removed
    }

    /// Reorg invalidated a shielded anchor: every transaction proven
    /// against it (and its dependents) must go.
    fn remove_with_anchor(&mut self, anchor: &Hash256) -> RemovedEntries {
        let anchored: Vec<Hash256> = self
            .map_tx
            .iter()
            .filter(|(_, entry)| {
                entry
                    .tx()
                    .joinsplits
                    .iter()
                    .any(|js| js.anchor == *anchor)
            })
            .map(|(hash, _)| *hash)
            .collect();

        let mut removed = RemovedEntries::default();
        for hash in &anchored {
            self.remove_by_hash(hash, true, &mut removed);
        }
        removed
    }

    fn clear(&mut self) {
        self.map_tx.clear();
        self.map_cert.clear();
        self.map_next_tx.clear();
        self.map_nullifiers.clear();
        self.map_sidechains.clear();
        self.map_deltas.clear();
        self.recently_added.clear();
        self.total_tx_size = 0;
        self.total_cert_size = 0;
        self.cached_inner_usage = 0;
        self.transactions_updated += 1;
    }

    // ------------------------------------------------------------------
    // Admission pre-checks (read-only)
    // ------------------------------------------------------------------

    fn check_incoming_tx_conflicts(&self, tx: &Transaction) -> Result<(), AdmissionError> {
        let hash = tx.hash();
        if self.map_tx.contains_key(&hash) {
            return Err(AdmissionError::AlreadyInPool(hash.to_string()));
        }

        for input in &tx.inputs {
            let prev = &input.previous_output;
            if let Some(locator) = self.map_next_tx.get(prev) {
                return Err(AdmissionError::DoubleSpend {
                    candidate: hash.to_string(),
                    existing: locator.spender.to_string(),
                    outpoint: prev.to_string(),
                });
            }
            if let Some(entry) = self.map_cert.get(&prev.txid) {
                if entry.cert().is_backward_transfer(prev.index) {
                    return Err(AdmissionError::SpendsUnconfirmedBwt {
                        candidate: hash.to_string(),
                        outpoint: prev.to_string(),
                    });
                }
            }
        }

        for sc in &tx.sc_creations {
            if self.has_sidechain_creation_tx(&sc.sc_id) {
                return Err(AdmissionError::SidechainRedeclaration(sc.sc_id.to_string()));
            }
        }

        for js in &tx.joinsplits {
            for nf in &js.nullifiers {
                if self.map_nullifiers.contains_key(nf) {
                    return Err(AdmissionError::NullifierClash(nf.to_string()));
                }
            }
        }

        for csw in &tx.csw_inputs {
            if self.have_csw_nullifier(&csw.sc_id, &csw.nullifier) {
                return Err(AdmissionError::CswNullifierClash {
                    sc_id: csw.sc_id.to_string(),
                    nullifier: csw.nullifier.to_string(),
                });
            }
        }

        Ok(())
    }

    fn check_incoming_cert_conflicts(&self, cert: &Certificate) -> Result<(), AdmissionError> {
        let hash = cert.hash();
        if self.map_cert.contains_key(&hash) {
            return Err(AdmissionError::AlreadyInPool(hash.to_string()));
        }

        for input in &cert.inputs {
            let prev = &input.previous_output;
            if let Some(locator) = self.map_next_tx.get(prev) {
                return Err(AdmissionError::DoubleSpend {
                    candidate: hash.to_string(),
                    existing: locator.spender.to_string(),
                    outpoint: prev.to_string(),
                });
            }
            if let Some(entry) = self.map_cert.get(&prev.txid) {
                if entry.cert().is_backward_transfer(prev.index) {
                    return Err(AdmissionError::SpendsUnconfirmedBwt {
                        candidate: hash.to_string(),
                        outpoint: prev.to_string(),
                    });
                }
            }
        }

        // No certificate may structurally depend on one of equal or higher
        // quality for the same sidechain.
        for ancestor in self.ancestors_closure(PayloadRef::Cert(cert)) {
            let Some(entry) = self.map_cert.get(&ancestor) else {
                continue;
            };
            let pool_cert = entry.cert();
            if pool_cert.sc_id == cert.sc_id && pool_cert.quality >= cert.quality {
                return Err(AdmissionError::QualityDependency {
                    candidate: hash.to_string(),
                    quality: cert.quality,
                    ancestor: ancestor.to_string(),
                    ancestor_quality: pool_cert.quality,
                });
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Structural audit
    // ------------------------------------------------------------------

    /// Verify every internal invariant; panics on the first violation.
    /// Quadratic in the pool size, intended for tests and debug builds.
    fn check(&self, view: &dyn ChainView) {
        debug!(
            txs = self.map_tx.len(),
            certs = self.map_cert.len(),
            sidechains = self.map_sidechains.len(),
            inputs = self.map_next_tx.len(),
            "checking mempool"
        );

        let mut check_size = 0usize;
        let mut check_usage = 0usize;
        let mut csw_totals: BTreeMap<ScId, Amount> = BTreeMap::new();

        for (hash, entry) in &self.map_tx {
            let tx = entry.tx();
            assert_eq!(*hash, entry.hash(), "tx keyed under wrong hash");
            check_size += entry.tx_size();
            check_usage += entry.usage_size();

            for (i, input) in tx.inputs.iter().enumerate() {
                let prev = &input.previous_output;
                if let Some(parent) = self.map_tx.get(&prev.txid) {
                    assert!(
                        (prev.index as usize) < parent.tx().outputs.len(),
                        "tx {hash} spends out-of-range output {prev}"
                    );
                } else if let Some(parent) = self.map_cert.get(&prev.txid) {
                    assert!(
                        !parent.cert().is_backward_transfer(prev.index),
                        "tx {hash} spends unconfirmed backward transfer {prev}"
                    );
                } else {
                    let coins = view
                        .get_coins(&prev.txid)
                        .unwrap_or_else(|| panic!("tx {hash} input {prev} unknown to chain"));
                    assert!(coins.is_available(prev.index), "tx {hash} spends spent coin {prev}");
                }
                let locator = self
                    .map_next_tx
                    .get(prev)
                    .unwrap_or_else(|| panic!("outpoint {prev} missing from spender index"));
                assert_eq!(locator.spender, *hash);
                assert_eq!(locator.vin_index, i as u32);
            }

            for js in &tx.joinsplits {
                for nf in &js.nullifiers {
                    assert_eq!(self.map_nullifiers.get(nf), Some(hash), "nullifier index skew");
                    assert!(!view.get_nullifier(nf), "pool nullifier already spent on chain");
                }
            }

            for sc in &tx.sc_creations {
                let row = self
                    .map_sidechains
                    .get(&sc.sc_id)
                    .expect("creation missing its sidechain row");
                assert_eq!(row.sc_creation_tx, Some(*hash));
                assert!(
                    !view.have_sidechain(&sc.sc_id),
                    "unconfirmed creation re-declares committed sidechain {}",
                    sc.sc_id
                );
                assert!(row.backward_certificates.is_empty(), "certs for unconfirmed sidechain");
                assert!(row.csw_nullifiers.is_empty(), "csw for unconfirmed sidechain");
                assert_eq!(row.csw_total_amount, 0);
            }

            for fwd in &tx.forward_transfers {
                let row = self
                    .map_sidechains
                    .get(&fwd.sc_id)
                    .expect("forward transfer missing its sidechain row");
                assert!(row.fwd_tx_hashes.contains(hash));
                if let Some(creation) = row.sc_creation_tx {
                    assert!(self.map_tx.contains_key(&creation), "dangling creation hash");
                } else {
                    assert_eq!(
                        view.sidechain_state(&fwd.sc_id),
                        SidechainState::Alive,
                        "forward transfer to a sidechain that is neither pooled nor alive"
                    );
                }
            }

            let mut tx_csw: BTreeMap<ScId, Amount> = BTreeMap::new();
            for csw in &tx.csw_inputs {
                let row = self
                    .map_sidechains
                    .get(&csw.sc_id)
                    .expect("csw missing its sidechain row");
                assert_eq!(row.csw_nullifiers.get(&csw.nullifier), Some(hash));
                assert_eq!(
                    view.sidechain_state(&csw.sc_id),
                    SidechainState::Ceased,
                    "csw against a sidechain that has not ceased"
                );
                *tx_csw.entry(csw.sc_id).or_default() += csw.value;
            }
            for (sc_id, amount) in tx_csw {
                let sidechain = view
                    .get_sidechain(&sc_id)
                    .expect("ceased sidechain missing from chain view");
                assert!(
                    amount <= sidechain.balance,
                    "tx {hash} withdraws more than sidechain {sc_id} holds"
                );
                *csw_totals.entry(sc_id).or_default() += amount;
            }

            for btr in &tx.btr_requests {
                let row = self
                    .map_sidechains
                    .get(&btr.sc_id)
                    .expect("btr missing its sidechain row");
                assert!(row.btr_tx_hashes.contains(hash));
                if let Some(creation) = row.sc_creation_tx {
                    assert!(self.map_tx.contains_key(&creation), "dangling creation hash");
                } else {
                    assert!(view.have_sidechain(&btr.sc_id), "btr to unknown sidechain");
                }
            }
        }

        for (sc_id, total) in &csw_totals {
            assert_eq!(
                self.map_sidechains
                    .get(sc_id)
                    .map(|row| row.csw_total_amount),
                Some(*total),
                "csw running sum out of step for sidechain {sc_id}"
            );
        }

        for (hash, entry) in &self.map_cert {
            let cert = entry.cert();
            assert_eq!(*hash, entry.hash(), "cert keyed under wrong hash");
            check_size += entry.cert_size();
            check_usage += entry.usage_size();

            let row = self
                .map_sidechains
                .get(&cert.sc_id)
                .expect("certificate missing its sidechain row");
            assert!(row.has_cert(hash));
            assert_eq!(row.cert_with_quality(cert.quality), Some(hash));

            for (i, input) in cert.inputs.iter().enumerate() {
                let prev = &input.previous_output;
                if let Some(parent) = self.map_cert.get(&prev.txid) {
                    assert!(
                        !parent.cert().is_backward_transfer(prev.index),
                        "cert {hash} spends unconfirmed backward transfer {prev}"
                    );
                } else if let Some(parent) = self.map_tx.get(&prev.txid) {
                    assert!(
                        (prev.index as usize) < parent.tx().outputs.len(),
                        "cert {hash} spends out-of-range output {prev}"
                    );
                } else {
                    let coins = view
                        .get_coins(&prev.txid)
                        .unwrap_or_else(|| panic!("cert {hash} input {prev} unknown to chain"));
                    assert!(coins.is_available(prev.index));
                }
                let locator = self
                    .map_next_tx
                    .get(prev)
                    .unwrap_or_else(|| panic!("outpoint {prev} missing from spender index"));
                assert_eq!(locator.spender, *hash);
                assert_eq!(locator.vin_index, i as u32);
            }
        }

        // Reverse direction: every secondary row resolves to a primary
        // entry that actually produces it.
        for (outpoint, locator) in &self.map_next_tx {
            let inputs: &[TxInput] = if let Some(entry) = self.map_tx.get(&locator.spender) {
                &entry.tx().inputs
            } else if let Some(entry) = self.map_cert.get(&locator.spender) {
                &entry.cert().inputs
            } else {
                panic!("spender index references unknown entry {}", locator.spender);
            };
            assert!((locator.vin_index as usize) < inputs.len());
            assert_eq!(inputs[locator.vin_index as usize].previous_output, *outpoint);
        }

        for (nf, owner) in &self.map_nullifiers {
            let entry = self
                .map_tx
                .get(owner)
                .unwrap_or_else(|| panic!("nullifier index references unknown tx {owner}"));
            assert!(entry
                .tx()
                .joinsplits
                .iter()
                .any(|js| js.nullifiers.contains(nf)));
        }

        for (sc_id, row) in &self.map_sidechains {
            assert!(!row.is_null(), "null sidechain row {sc_id} not erased");
            if let Some(creation) = row.sc_creation_tx {
                let entry = self
                    .map_tx
                    .get(&creation)
                    .unwrap_or_else(|| panic!("creation hash {creation} not in pool"));
                assert!(entry.tx().sc_creations.iter().any(|sc| sc.sc_id == *sc_id));
            }
            for fwd_hash in &row.fwd_tx_hashes {
                let entry = self.map_tx.get(fwd_hash).expect("fwd hash not in pool");
                assert!(entry
                    .tx()
                    .forward_transfers
                    .iter()
                    .any(|fwd| fwd.sc_id == *sc_id));
            }
            for btr_hash in &row.btr_tx_hashes {
                let entry = self.map_tx.get(btr_hash).expect("btr hash not in pool");
                assert!(entry.tx().btr_requests.iter().any(|btr| btr.sc_id == *sc_id));
            }
            if !row.btr_tx_hashes.is_empty() {
                assert!(row.btr_cert_data_hash.is_some(), "btr row lost its snapshot");
            }
            for (nf, owner) in &row.csw_nullifiers {
                let entry = self.map_tx.get(owner).expect("csw owner not in pool");
                assert!(entry
                    .tx()
                    .csw_inputs
                    .iter()
                    .any(|csw| csw.sc_id == *sc_id && csw.nullifier == *nf));
            }
            for (quality, cert_hash) in &row.backward_certificates {
                let entry = self.map_cert.get(cert_hash).expect("cert hash not in pool");
                assert_eq!(entry.cert().sc_id, *sc_id);
                assert_eq!(entry.cert().quality, *quality);
            }
        }

        assert_eq!(check_size, self.total_tx_size + self.total_cert_size);
        assert_eq!(check_usage, self.cached_inner_usage);

        self.check_replayable();
    }

    /// The dependency topology must be replayable: repeatedly releasing
    /// entries whose in-pool ancestors have all been released must drain
    /// the pool. A stall means a cycle or a dangling dependency.
    fn check_replayable(&self) {
        let mut pending: VecDeque<Hash256> = self
            .map_tx
            .keys()
            .chain(self.map_cert.keys())
            .copied()
            .collect();
        let mut released: BTreeSet<Hash256> = BTreeSet::new();
        let mut stalled = 0usize;

        while let Some(hash) = pending.pop_front() {
            let payload = self
                .payload_ref(&hash)
                .expect("pending hash vanished mid-replay");
            let ready = self
                .direct_ancestors(payload)
                .iter()
                .all(|ancestor| released.contains(ancestor));
            if ready {
                released.insert(hash);
                stalled = 0;
            } else {
                pending.push_back(hash);
                stalled += 1;
                assert!(
                    stalled <= pending.len(),
                    "pool dependency graph is not replayable (cycle at {hash})"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Prioritisation
    // ------------------------------------------------------------------

    fn prioritise(&mut self, hash: &Hash256, d_priority: f64, d_fee: Amount) {
        let deltas = self.map_deltas.entry(*hash).or_insert((0.0, 0));
        deltas.0 += d_priority;
        deltas.1 += d_fee;
        debug!(%hash, d_priority, d_fee, "prioritised");
    }

    fn apply_deltas(&self, hash: &Hash256, priority: &mut f64, fee: &mut Amount) {
        if let Some((d_priority, d_fee)) = self.map_deltas.get(hash) {
            *priority += d_priority;
            *fee += d_fee;
        }
    }

    // ------------------------------------------------------------------
    // Coins helpers
    // ------------------------------------------------------------------

    /// Strip from `coins` every output of `hash` that a pool entry already
    /// spends.
    fn prune_spent(&self, hash: &Hash256, coins: &mut Coins) {
        let from = OutPoint { txid: *hash, index: 0 };
        let to = OutPoint { txid: *hash, index: u32::MAX };
        for (outpoint, _) in self.map_next_tx.range(from..=to) {
            coins.spend(outpoint.index);
        }
    }

    fn dynamic_memory_usage(&self) -> usize {
        // Per-node overhead of the index maps plus the measured payloads.
        let node = 4 * mem::size_of::<usize>();
        let index_entries = self.map_tx.len()
            + self.map_cert.len()
            + self.map_next_tx.len()
            + self.map_nullifiers.len()
            + self.map_sidechains.len()
            + self.map_deltas.len()
            + self.recently_added.len();
        index_entries * (node + mem::size_of::<Hash256>()) + self.cached_inner_usage
    }
}

/// The mempool: a process-wide index of unconfirmed transactions and
/// certificates behind a single mutex.
///
/// All mutators and queries acquire the lock; none suspends while holding
/// it. Wallet notification drains the recently-added queue under the lock
/// and calls listeners after releasing it.
pub struct Mempool {
    inner: Mutex<PoolInner>,
    run_expensive_checks: bool,
}

impl Mempool {
    /// Create an empty pool.
    pub fn new(config: &MempoolConfig) -> Self {
        Self {
            inner: Mutex::new(PoolInner::new(config)),
            run_expensive_checks: config.run_expensive_checks,
        }
    }

    // --- admission ---

    /// Insert a transaction the external validator has fully approved,
    /// updating every secondary index atomically.
    ///
    /// `cert_data_hashes` must map each sidechain targeted by one of the
    /// transaction's BTRs to the chain's current active-cert-data-hash;
    /// a missing entry is a programming error and panics.
    pub fn add_unchecked_tx(
        &self,
        entry: TxMempoolEntry,
        current_estimate: bool,
        cert_data_hashes: &BTreeMap<ScId, Hash256>,
    ) {
        self.inner
            .lock()
            .add_tx(entry, current_estimate, cert_data_hashes)
    }

    /// Insert a certificate the external validator has fully approved.
    pub fn add_unchecked_cert(&self, entry: CertMempoolEntry, current_estimate: bool) {
        self.inner.lock().add_cert(entry, current_estimate)
    }

    /// Structural pre-check for an incoming transaction. Read-only; a
    /// refusal carries the reason for the caller to log.
    pub fn check_incoming_tx_conflicts(&self, tx: &Transaction) -> Result<(), AdmissionError> {
        self.inner.lock().check_incoming_tx_conflicts(tx)
    }

    /// Structural pre-check for an incoming certificate.
    pub fn check_incoming_cert_conflicts(
        &self,
        cert: &Certificate,
    ) -> Result<(), AdmissionError> {
        self.inner.lock().check_incoming_cert_conflicts(cert)
    }

    // --- removal ---

    /// Remove a transaction; with `recursive`, its descendant closure goes
    /// first. Returns the evicted payloads, descendants before ancestors.
    pub fn remove_tx(&self, tx: &Transaction, recursive: bool) -> RemovedEntries {
        let mut removed = RemovedEntries::default();
        self.inner
            .lock()
            .remove_ref(PayloadRef::Tx(tx), recursive, &mut removed);
        removed
    }

    /// Remove a certificate; see [`remove_tx`](Self::remove_tx).
    pub fn remove_cert(&self, cert: &Certificate, recursive: bool) -> RemovedEntries {
        let mut removed = RemovedEntries::default();
        self.inner
            .lock()
            .remove_ref(PayloadRef::Cert(cert), recursive, &mut removed);
        removed
    }

    /// Block connect, transaction side: confirmed entries leave
    /// non-recursively, conflicting entries are evicted recursively and
    /// returned, and the estimator observes the confirmations.
    pub fn remove_for_block_txs(
        &self,
        block_txs: &[Transaction],
        block_height: u32,
        current_estimate: bool,
    ) -> RemovedEntries {
        self.inner
            .lock()
            .remove_for_block_txs(block_txs, block_height, current_estimate)
    }

    /// Block connect, certificate side: confirmed certificates leave
    /// non-recursively; double spenders and superseded (lower-or-equal
    /// quality, same sidechain and epoch) certificates are evicted
    /// recursively and returned.
    pub fn remove_for_block_certs(&self, block_certs: &[Certificate]) -> RemovedEntries {
        self.inner.lock().remove_for_block_certs(block_certs)
    }

    /// Chain-tip change: evict entries invalidated by the new tip
    /// (immature expenditures, closed submission windows, non-ceased CSW
    /// targets, outdated BTR snapshots).
    pub fn remove_stale(&self, view: &dyn ChainView) -> RemovedEntries {
        self.inner.lock().remove_stale(view)
    }

    /// Evict all CSW transactions of sidechains whose pending withdrawals
    /// exceed their committed balance.
    pub fn remove_out_of_sc_balance_csw(&self, view: &dyn ChainView) -> RemovedEntries {
        self.inner.lock().remove_out_of_sc_balance_csw(view)
    }

    /// Evict every transaction proven against `anchor` (and dependents).
    /// Idempotent: a second call with the same anchor is a no-op.
    pub fn remove_with_anchor(&self, anchor: &Hash256) -> RemovedEntries {
        self.inner.lock().remove_with_anchor(anchor)
    }

    /// Recursively remove a certificate by hash and report the evicted
    /// payloads to `listener` immediately.
    pub fn remove_cert_and_sync(
        &self,
        hash: &Hash256,
        mut listener: impl FnMut(&MempoolPayload),
    ) {
        let mut removed = RemovedEntries::default();
        {
            let mut inner = self.inner.lock();
            if !inner.map_cert.contains_key(hash) {
                return;
            }
            inner.remove_by_hash(hash, true, &mut removed);
        }
        for tx in &removed.txs {
            listener(&MempoolPayload::Tx(Arc::clone(tx)));
        }
        for cert in &removed.certs {
            listener(&MempoolPayload::Cert(Arc::clone(cert)));
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.inner.lock().clear()
    }

    // --- DAG queries ---

    /// Ancestor closure of a pool entry, breadth-first discovery order.
    /// Empty if the hash is not in the pool.
    pub fn ancestors_of(&self, hash: &Hash256) -> Vec<Hash256> {
        let inner = self.inner.lock();
        match inner.payload_ref(hash) {
            Some(payload) => inner.ancestors_closure(payload),
            None => Vec::new(),
        }
    }

    /// Descendant closure of a pool entry, depth-first pre-order. Empty if
    /// the hash is not in the pool.
    pub fn descendants_of(&self, hash: &Hash256) -> Vec<Hash256> {
        let inner = self.inner.lock();
        match inner.payload_ref(hash) {
            Some(payload) => inner.descendants_closure(payload, hash),
            None => Vec::new(),
        }
    }

    // --- queries ---

    pub fn exists(&self, hash: &Hash256) -> bool {
        self.inner.lock().exists(hash)
    }

    pub fn lookup_tx(&self, hash: &Hash256) -> Option<Arc<Transaction>> {
        self.inner
            .lock()
            .map_tx
            .get(hash)
            .map(|entry| Arc::clone(entry.tx()))
    }

    pub fn lookup_cert(&self, hash: &Hash256) -> Option<Arc<Certificate>> {
        self.inner
            .lock()
            .map_cert
            .get(hash)
            .map(|entry| Arc::clone(entry.cert()))
    }

    /// All pool hashes, transactions first.
    pub fn query_hashes(&self) -> Vec<Hash256> {
        let inner = self.inner.lock();
        inner
            .map_tx
            .keys()
            .chain(inner.map_cert.keys())
            .copied()
            .collect()
    }

    /// Number of transactions in the pool.
    pub fn size(&self) -> usize {
        self.inner.lock().map_tx.len()
    }

    /// Number of certificates in the pool.
    pub fn cert_count(&self) -> usize {
        self.inner.lock().map_cert.len()
    }

    pub fn total_tx_size(&self) -> usize {
        self.inner.lock().total_tx_size
    }

    pub fn total_cert_size(&self) -> usize {
        self.inner.lock().total_cert_size
    }

    /// Monotonic counter bumped by every tx add or remove.
    pub fn transactions_updated(&self) -> u64 {
        self.inner.lock().transactions_updated
    }

    /// Credit externally observed updates to the counter.
    pub fn add_transactions_updated(&self, n: u64) {
        self.inner.lock().transactions_updated += n;
    }

    /// Monotonic counter bumped by every certificate add or remove.
    pub fn certificates_updated(&self) -> u64 {
        self.inner.lock().certificates_updated
    }

    /// Rough total heap footprint of the pool.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.inner.lock().dynamic_memory_usage()
    }

    /// Whether none of `tx`'s inputs is a pool entry.
    pub fn has_no_inputs_of(&self, tx: &Transaction) -> bool {
        let inner = self.inner.lock();
        !tx.inputs
            .iter()
            .any(|input| inner.exists(&input.previous_output.txid))
    }

    /// Whether the pool holds the creation transaction for `sc_id`.
    pub fn has_sidechain_creation_tx(&self, sc_id: &ScId) -> bool {
        self.inner.lock().has_sidechain_creation_tx(sc_id)
    }

    /// Hash of the pool-resident creation transaction for `sc_id`.
    pub fn sidechain_creation_hash(&self, sc_id: &ScId) -> Option<Hash256> {
        self.inner
            .lock()
            .map_sidechains
            .get(sc_id)
            .and_then(|row| row.sc_creation_tx)
    }

    pub fn have_csw_nullifier(&self, sc_id: &ScId, nullifier: &Hash256) -> bool {
        self.inner.lock().have_csw_nullifier(sc_id, nullifier)
    }

    /// Whether the pool holds a transaction claiming this shielded nullifier.
    pub fn contains_nullifier(&self, nullifier: &Hash256) -> bool {
        self.inner.lock().map_nullifiers.contains_key(nullifier)
    }

    /// Pending CSW total for a sidechain; zero if no row.
    pub fn csw_total_amount(&self, sc_id: &ScId) -> Amount {
        self.inner
            .lock()
            .map_sidechains
            .get(sc_id)
            .map(|row| row.csw_total_amount)
            .unwrap_or(0)
    }

    /// Whether the pool tracks any state for `sc_id`.
    pub fn has_sidechain_row(&self, sc_id: &ScId) -> bool {
        self.inner.lock().map_sidechains.contains_key(sc_id)
    }

    /// Hash of the top-quality pool certificate for `sc_id`.
    pub fn top_quality_cert(&self, sc_id: &ScId) -> Option<Hash256> {
        self.inner
            .lock()
            .map_sidechains
            .get(sc_id)
            .and_then(|row| row.top_quality_cert().copied())
    }

    /// The pool certificate for `sc_id` at exactly `quality`, with its fee.
    pub fn find_cert_with_quality(
        &self,
        sc_id: &ScId,
        quality: i64,
    ) -> Option<(Hash256, Amount)> {
        let inner = self.inner.lock();
        let hash = *inner.map_sidechains.get(sc_id)?.cert_with_quality(quality)?;
        let fee = inner.map_cert.get(&hash)?.fee();
        Some((hash, fee))
    }

    /// Ids of sidechains with a pool-resident creation, merged into `out`.
    pub fn pool_sc_ids(&self, out: &mut BTreeSet<ScId>) {
        let inner = self.inner.lock();
        for (sc_id, row) in &inner.map_sidechains {
            if row.sc_creation_tx.is_some() {
                out.insert(*sc_id);
            }
        }
    }

    /// Strip from `coins` every output a pool entry already spends.
    pub fn prune_spent(&self, hash: &Hash256, coins: &mut Coins) {
        self.inner.lock().prune_spent(hash, coins)
    }

    // --- prioritisation ---

    /// Record an operator bias for `hash`; applied on priority/fee reads.
    pub fn prioritise(&self, hash: &Hash256, d_priority: f64, d_fee: Amount) {
        self.inner.lock().prioritise(hash, d_priority, d_fee)
    }

    /// Fold any recorded bias for `hash` into `priority` and `fee`.
    pub fn apply_deltas(&self, hash: &Hash256, priority: &mut f64, fee: &mut Amount) {
        self.inner.lock().apply_deltas(hash, priority, fee)
    }

    pub fn clear_prioritisation(&self, hash: &Hash256) {
        self.inner.lock().map_deltas.remove(hash);
    }

    // --- estimator ---

    pub fn estimate_fee(&self, n_blocks: usize) -> Option<harbor_core::amount::FeeRate> {
        self.inner.lock().estimator.estimate_fee(n_blocks)
    }

    pub fn estimate_priority(&self, n_blocks: usize) -> Option<f64> {
        self.inner.lock().estimator.estimate_priority(n_blocks)
    }

    /// Persist the estimator snapshot:
    /// `[u32 version-required][u32 version-written][body]`, little-endian.
    /// Failures are logged and surfaced; callers proceed without the
    /// snapshot.
    pub fn write_fee_estimates(&self, out: &mut impl Write) -> Result<(), EstimatorError> {
        let result = (|| {
            out.write_all(&ESTIMATES_MIN_VERSION.to_le_bytes())?;
            out.write_all(&CLIENT_VERSION.to_le_bytes())?;
            self.inner
                .lock()
                .estimator
                .write(out)
                .map_err(|e| EstimatorError::Encoding(e.to_string()))
        })();
        if let Err(e) = &result {
            warn!("unable to write fee estimates (non-fatal): {e}");
        }
        result
    }

    /// Load an estimator snapshot written by [`write_fee_estimates`]
    /// (rejecting files that need a newer client).
    ///
    /// [`write_fee_estimates`]: Self::write_fee_estimates
    pub fn read_fee_estimates(&self, input: &mut impl Read) -> Result<(), EstimatorError> {
        let result = (|| {
            let mut word = [0u8; 4];
            input.read_exact(&mut word)?;
            let version_required = u32::from_le_bytes(word);
            input.read_exact(&mut word)?;
            let _version_that_wrote = u32::from_le_bytes(word);
            if version_required > CLIENT_VERSION {
                return Err(EstimatorError::UpVersion {
                    required: version_required,
                    current: CLIENT_VERSION,
                });
            }
            self.inner
                .lock()
                .estimator
                .read(input)
                .map_err(|e| EstimatorError::Encoding(e.to_string()))
        })();
        if let Err(e) = &result {
            warn!("unable to read fee estimates (non-fatal): {e}");
        }
        result
    }

    // --- wallet sync ---

    /// Drain the recently-added queue under the lock, then invoke
    /// `listener` for each payload with the lock released; listeners may
    /// block.
    pub fn notify_recently_added(&self, mut listener: impl FnMut(&MempoolPayload)) {
        let (sequence, drained) = {
            let mut inner = self.inner.lock();
            let drained: Vec<Arc<MempoolPayload>> =
                mem::take(&mut inner.recently_added).into_values().collect();
            (inner.recently_added_sequence, drained)
        };

        for payload in &drained {
            listener(payload);
        }

        self.inner.lock().notified_sequence = sequence;
    }

    /// Whether every admitted payload has been reported to listeners.
    pub fn is_fully_notified(&self) -> bool {
        let inner = self.inner.lock();
        inner.recently_added_sequence == inner.notified_sequence
    }

    // --- audit ---

    /// Expensive structural self-audit; panics on any violated invariant.
    pub fn check(&self, view: &dyn ChainView) {
        self.inner.lock().check(view)
    }

    /// Run the audit only when the config opted in. Inserted after
    /// mutating operations by hosts that want continuous self-checking;
    /// accepting a transaction would otherwise become O(n^2) in the pool
    /// size.
    pub fn check_if_enabled(&self, view: &dyn ChainView) {
        if self.run_expensive_checks {
            self.check(view);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::amount::COIN;
    use harbor_core::types::{CswInput, JoinSplit, ScCreationOut, Sidechain, TxOutput};

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn h(seed: u8) -> Hash256 {
        Hash256([seed; 32])
    }

    fn op(seed: u8, index: u32) -> OutPoint {
        OutPoint { txid: h(seed), index }
    }

    fn input(outpoint: OutPoint) -> TxInput {
        TxInput {
            previous_output: outpoint,
            signature: vec![0; 64],
            public_key: vec![0; 32],
        }
    }

    fn output(value: Amount) -> TxOutput {
        TxOutput { value, pubkey_hash: Hash256::ZERO }
    }

    fn make_tx(outpoints: &[OutPoint], n_outputs: usize) -> Transaction {
        Transaction {
            version: 1,
            inputs: outpoints.iter().map(|outpoint| input(*outpoint)).collect(),
            outputs: (0..n_outputs).map(|i| output((i as Amount + 1) * COIN)).collect(),
            ..Transaction::default()
        }
    }

    fn make_cert(sc_id: ScId, epoch: u32, quality: i64, outpoints: &[OutPoint]) -> Certificate {
        Certificate {
            version: 1,
            sc_id,
            epoch_number: epoch,
            quality,
            inputs: outpoints.iter().map(|outpoint| input(*outpoint)).collect(),
            outputs: vec![output(COIN), output(2 * COIN)],
            first_bwt_index: 1,
        }
    }

    fn pool() -> Mempool {
        Mempool::new(&MempoolConfig::default())
    }

    fn add_tx(pool: &Mempool, tx: &Transaction) {
        let entry = TxMempoolEntry::new(tx.clone(), 1000, 0, 0.0, 100, true);
        pool.add_unchecked_tx(entry, true, &BTreeMap::new());
    }

    fn add_tx_with_snapshots(
        pool: &Mempool,
        tx: &Transaction,
        cert_data_hashes: &BTreeMap<ScId, Hash256>,
    ) {
        let entry = TxMempoolEntry::new(tx.clone(), 1000, 0, 0.0, 100, true);
        pool.add_unchecked_tx(entry, true, cert_data_hashes);
    }

    fn add_cert(pool: &Mempool, cert: &Certificate) {
        let entry = CertMempoolEntry::new(cert.clone(), 500, 0, 0.0, 100);
        pool.add_unchecked_cert(entry, true);
    }

    /// Chain view stub with configurable coins and sidechains.
    #[derive(Default)]
    struct MockView {
        coins: BTreeMap<Hash256, Coins>,
        sidechains: BTreeMap<ScId, (Sidechain, SidechainState)>,
        cert_data: BTreeMap<ScId, Hash256>,
        nullifiers: BTreeSet<Hash256>,
        anchors: BTreeSet<Hash256>,
        height: u32,
        cert_timing_ok: bool,
        sc_tx_timing_ok: bool,
    }

    impl MockView {
        fn new() -> Self {
            Self {
                height: 200,
                cert_timing_ok: true,
                sc_tx_timing_ok: true,
                ..Self::default()
            }
        }

        fn with_coins(mut self, seed: u8, n_outputs: usize) -> Self {
            let tx = make_tx(&[op(0xF0 ^ seed, 0)], n_outputs);
            self.coins.insert(h(seed), Coins::from_tx(&tx, 10));
            self
        }
    }

    impl ChainView for MockView {
        fn get_coins(&self, txid: &Hash256) -> Option<Coins> {
            self.coins.get(txid).cloned()
        }
        fn get_nullifier(&self, nullifier: &Hash256) -> bool {
            self.nullifiers.contains(nullifier)
        }
        fn have_sidechain(&self, sc_id: &ScId) -> bool {
            self.sidechains.contains_key(sc_id)
        }
        fn get_sidechain(&self, sc_id: &ScId) -> Option<Sidechain> {
            self.sidechains.get(sc_id).map(|(info, _)| info.clone())
        }
        fn sidechain_state(&self, sc_id: &ScId) -> SidechainState {
            self.sidechains
                .get(sc_id)
                .map(|(_, state)| *state)
                .unwrap_or(SidechainState::NotApplicable)
        }
        fn active_cert_data_hash(&self, sc_id: &ScId) -> Option<Hash256> {
            self.cert_data.get(sc_id).copied()
        }
        fn check_cert_timing(&self, _sc_id: &ScId, _epoch: u32) -> bool {
            self.cert_timing_ok
        }
        fn check_sc_tx_timing(&self, _sc_id: &ScId) -> bool {
            self.sc_tx_timing_ok
        }
        fn have_anchor(&self, anchor: &Hash256) -> bool {
            self.anchors.contains(anchor)
        }
        fn have_csw_nullifier(&self, _sc_id: &ScId, _nullifier: &Hash256) -> bool {
            false
        }
        fn sc_ids(&self, out: &mut BTreeSet<ScId>) {
            out.extend(self.sidechains.keys().copied());
        }
        fn height(&self) -> u32 {
            self.height
        }
    }

    // ------------------------------------------------------------------
    // Basic operations
    // ------------------------------------------------------------------

    #[test]
    fn new_pool_is_empty() {
        let pool = pool();
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.cert_count(), 0);
        assert_eq!(pool.total_tx_size(), 0);
        assert!(pool.query_hashes().is_empty());
    }

    #[test]
    fn add_and_lookup_tx() {
        let pool = pool();
        let tx = make_tx(&[op(1, 0)], 2);
        add_tx(&pool, &tx);

        assert_eq!(pool.size(), 1);
        assert!(pool.exists(&tx.hash()));
        assert_eq!(pool.lookup_tx(&tx.hash()).unwrap().as_ref(), &tx);
        assert!(pool.total_tx_size() > 0);
        assert_eq!(pool.transactions_updated(), 1);
    }

    #[test]
    fn add_and_lookup_cert() {
        let pool = pool();
        let cert = make_cert(h(0xA0), 1, 10, &[op(1, 0)]);
        add_cert(&pool, &cert);

        assert_eq!(pool.cert_count(), 1);
        assert_eq!(pool.lookup_cert(&cert.hash()).unwrap().as_ref(), &cert);
        assert_eq!(pool.top_quality_cert(&h(0xA0)), Some(cert.hash()));
        assert_eq!(
            pool.find_cert_with_quality(&h(0xA0), 10),
            Some((cert.hash(), 500))
        );
        assert_eq!(pool.find_cert_with_quality(&h(0xA0), 11), None);
    }

    #[test]
    fn remove_tx_clears_all_indices() {
        let pool = pool();
        let tx = make_tx(&[op(1, 0), op(2, 0)], 1);
        add_tx(&pool, &tx);

        let removed = pool.remove_tx(&tx, false);
        assert_eq!(removed.txs.len(), 1);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.total_tx_size(), 0);
        assert_eq!(pool.dynamic_memory_usage(), 0);

        // Both outpoints are free again.
        let respend = make_tx(&[op(1, 0)], 1);
        assert!(pool.check_incoming_tx_conflicts(&respend).is_ok());
    }

    #[test]
    fn remove_absent_entry_is_noop() {
        let pool = pool();
        let tx = make_tx(&[op(1, 0)], 1);
        let removed = pool.remove_tx(&tx, true);
        assert!(removed.is_empty());
    }

    #[test]
    fn clear_drains_everything() {
        let pool = pool();
        add_tx(&pool, &make_tx(&[op(1, 0)], 1));
        add_cert(&pool, &make_cert(h(0xA0), 1, 10, &[op(2, 0)]));
        pool.prioritise(&h(9), 1.0, 5);

        pool.clear();
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.cert_count(), 0);
        assert_eq!(pool.total_cert_size(), 0);
    }

    // ------------------------------------------------------------------
    // Admission pre-checks
    // ------------------------------------------------------------------

    #[test]
    fn incoming_duplicate_refused() {
        let pool = pool();
        let tx = make_tx(&[op(1, 0)], 1);
        add_tx(&pool, &tx);
        assert!(matches!(
            pool.check_incoming_tx_conflicts(&tx),
            Err(AdmissionError::AlreadyInPool(_))
        ));
    }

    #[test]
    fn incoming_double_spend_refused() {
        let pool = pool();
        add_tx(&pool, &make_tx(&[op(1, 0)], 1));

        let rival = make_tx(&[op(1, 0)], 2);
        assert!(matches!(
            pool.check_incoming_tx_conflicts(&rival),
            Err(AdmissionError::DoubleSpend { .. })
        ));
    }

    #[test]
    fn incoming_tx_may_spend_cert_change_but_not_bwt() {
        let pool = pool();
        let cert = make_cert(h(0xA0), 1, 10, &[op(1, 0)]);
        add_cert(&pool, &cert);

        // Output 0 is change: allowed.
        let spends_change = make_tx(&[OutPoint { txid: cert.hash(), index: 0 }], 1);
        assert!(pool.check_incoming_tx_conflicts(&spends_change).is_ok());

        // Output 1 is a backward transfer: refused.
        let spends_bwt = make_tx(&[OutPoint { txid: cert.hash(), index: 1 }], 1);
        assert!(matches!(
            pool.check_incoming_tx_conflicts(&spends_bwt),
            Err(AdmissionError::SpendsUnconfirmedBwt { .. })
        ));
    }

    #[test]
    fn incoming_nullifier_clash_refused() {
        let pool = pool();
        let mut shielded = make_tx(&[op(1, 0)], 1);
        shielded.joinsplits.push(JoinSplit {
            anchor: h(0x50),
            nullifiers: vec![h(0x51)],
            commitments: vec![],
        });
        add_tx(&pool, &shielded);

        let mut rival = make_tx(&[op(2, 0)], 1);
        rival.joinsplits.push(JoinSplit {
            anchor: h(0x52),
            nullifiers: vec![h(0x51)],
            commitments: vec![],
        });
        assert!(matches!(
            pool.check_incoming_tx_conflicts(&rival),
            Err(AdmissionError::NullifierClash(_))
        ));
    }

    #[test]
    fn incoming_csw_nullifier_clash_refused() {
        let pool = pool();
        let mut withdrawer = make_tx(&[op(1, 0)], 1);
        withdrawer.csw_inputs.push(CswInput {
            sc_id: h(0xA0),
            nullifier: h(0x60),
            value: 40,
        });
        add_tx(&pool, &withdrawer);

        let mut rival = make_tx(&[op(2, 0)], 1);
        rival.csw_inputs.push(CswInput {
            sc_id: h(0xA0),
            nullifier: h(0x60),
            value: 10,
        });
        assert!(matches!(
            pool.check_incoming_tx_conflicts(&rival),
            Err(AdmissionError::CswNullifierClash { .. })
        ));
        assert!(pool.have_csw_nullifier(&h(0xA0), &h(0x60)));
        assert_eq!(pool.csw_total_amount(&h(0xA0)), 40);
    }

    #[test]
    fn incoming_sidechain_redeclaration_refused() {
        let pool = pool();
        let mut creator = make_tx(&[op(1, 0)], 1);
        creator.sc_creations.push(ScCreationOut {
            sc_id: h(0xA0),
            value: COIN,
            withdrawal_epoch_length: 10,
        });
        add_tx(&pool, &creator);
        assert!(pool.has_sidechain_creation_tx(&h(0xA0)));

        let mut rival = make_tx(&[op(2, 0)], 1);
        rival.sc_creations.push(ScCreationOut {
            sc_id: h(0xA0),
            value: COIN,
            withdrawal_epoch_length: 20,
        });
        assert!(matches!(
            pool.check_incoming_tx_conflicts(&rival),
            Err(AdmissionError::SidechainRedeclaration(_))
        ));
    }

    #[test]
    fn incoming_cert_must_beat_ancestor_quality() {
        let pool = pool();
        let ancestor = make_cert(h(0xA0), 1, 20, &[op(1, 0)]);
        add_cert(&pool, &ancestor);

        // Spends the ancestor's change output, but has lower quality.
        let low = make_cert(h(0xA0), 1, 10, &[OutPoint { txid: ancestor.hash(), index: 0 }]);
        assert!(matches!(
            pool.check_incoming_cert_conflicts(&low),
            Err(AdmissionError::QualityDependency { .. })
        ));

        // A higher-quality dependent is fine.
        let high = make_cert(h(0xA0), 1, 30, &[OutPoint { txid: ancestor.hash(), index: 0 }]);
        assert!(pool.check_incoming_cert_conflicts(&high).is_ok());

        // Quality pressure only applies within the same sidechain.
        let other_sc =
            make_cert(h(0xB0), 1, 5, &[OutPoint { txid: ancestor.hash(), index: 0 }]);
        assert!(pool.check_incoming_cert_conflicts(&other_sc).is_ok());
    }

    #[test]
    fn incoming_cert_may_not_spend_bwt() {
        let pool = pool();
        let ancestor = make_cert(h(0xA0), 1, 10, &[op(1, 0)]);
        add_cert(&pool, &ancestor);

        let spends_bwt =
            make_cert(h(0xA0), 1, 20, &[OutPoint { txid: ancestor.hash(), index: 1 }]);
        assert!(matches!(
            pool.check_incoming_cert_conflicts(&spends_bwt),
            Err(AdmissionError::SpendsUnconfirmedBwt { .. })
        ));
    }

    // ------------------------------------------------------------------
    // DAG traversal
    // ------------------------------------------------------------------

    #[test]
    fn descendants_follow_spends_and_sidechain_edges() {
        let pool = pool();
        // T1 creates sidechain S; T2 forwards to S; T3 spends T2's output.
        let mut t1 = make_tx(&[op(1, 0)], 1);
        t1.sc_creations.push(ScCreationOut {
            sc_id: h(0xA0),
            value: COIN,
            withdrawal_epoch_length: 10,
        });
        let mut t2 = make_tx(&[op(2, 0)], 1);
        t2.forward_transfers.push(harbor_core::types::ForwardTransferOut {
            sc_id: h(0xA0),
            value: COIN,
        });
        let t3 = make_tx(&[OutPoint { txid: t2.hash(), index: 0 }], 1);

        add_tx(&pool, &t1);
        add_tx(&pool, &t2);
        add_tx(&pool, &t3);

        let descendants = pool.descendants_of(&t1.hash());
        assert_eq!(descendants, vec![t2.hash(), t3.hash()]);

        let ancestors = pool.ancestors_of(&t3.hash());
        // T2 by spend, then T1 through the forward-transfer edge.
        assert_eq!(ancestors, vec![t2.hash(), t1.hash()]);
    }

    #[test]
    fn recursive_removal_is_dependents_first() {
        let pool = pool();
        let mut t1 = make_tx(&[op(1, 0)], 1);
        t1.sc_creations.push(ScCreationOut {
            sc_id: h(0xA0),
            value: COIN,
            withdrawal_epoch_length: 10,
        });
        let mut t2 = make_tx(&[op(2, 0)], 1);
        t2.forward_transfers.push(harbor_core::types::ForwardTransferOut {
            sc_id: h(0xA0),
            value: COIN,
        });
        let t3 = make_tx(&[OutPoint { txid: t2.hash(), index: 0 }], 1);

        add_tx(&pool, &t1);
        add_tx(&pool, &t2);
        add_tx(&pool, &t3);

        let removed = pool.remove_tx(&t1, true);
        let hashes: Vec<Hash256> = removed.txs.iter().map(|tx| tx.hash()).collect();
        assert_eq!(hashes, vec![t3.hash(), t2.hash(), t1.hash()]);
        assert_eq!(pool.size(), 0);
        // The sidechain row died with its last reference.
        assert!(!pool.has_sidechain_row(&h(0xA0)));
    }

    #[test]
    fn non_recursive_removal_leaves_descendants() {
        let pool = pool();
        let t1 = make_tx(&[op(1, 0)], 1);
        let t2 = make_tx(&[OutPoint { txid: t1.hash(), index: 0 }], 1);
        add_tx(&pool, &t1);
        add_tx(&pool, &t2);

        pool.remove_tx(&t1, false);
        assert!(!pool.exists(&t1.hash()));
        assert!(pool.exists(&t2.hash()));
    }

    // ------------------------------------------------------------------
    // Conflicts on block connect
    // ------------------------------------------------------------------

    #[test]
    fn block_connect_removes_confirmed_and_conflicting() {
        let pool = pool();
        let pooled = make_tx(&[op(1, 0)], 1);
        let rival_in_pool = make_tx(&[op(2, 0)], 1);
        add_tx(&pool, &pooled);
        add_tx(&pool, &rival_in_pool);

        // The block confirms `pooled` and a foreign tx that double-spends
        // the rival's input.
        let foreign = make_tx(&[op(2, 0)], 2);
        let conflicting =
            pool.remove_for_block_txs(&[pooled.clone(), foreign], 201, true);

        assert!(!pool.exists(&pooled.hash()));
        assert!(!pool.exists(&rival_in_pool.hash()));
        // Only the evicted rival is reported; confirmed entries are not.
        let hashes: Vec<Hash256> = conflicting.txs.iter().map(|tx| tx.hash()).collect();
        assert_eq!(hashes, vec![rival_in_pool.hash()]);
    }

    #[test]
    fn block_connect_keeps_descendants_of_confirmed() {
        let pool = pool();
        let parent = make_tx(&[op(1, 0)], 1);
        let child = make_tx(&[OutPoint { txid: parent.hash(), index: 0 }], 1);
        add_tx(&pool, &parent);
        add_tx(&pool, &child);

        let conflicting = pool.remove_for_block_txs(&[parent.clone()], 201, true);
        assert!(conflicting.is_empty());
        assert!(pool.exists(&child.hash()));
    }

    // ------------------------------------------------------------------
    // Prioritisation
    // ------------------------------------------------------------------

    #[test]
    fn deltas_accumulate_and_clear() {
        let pool = pool();
        pool.prioritise(&h(1), 2.0, 100);
        pool.prioritise(&h(1), 1.0, -30);

        let mut priority = 0.0;
        let mut fee: Amount = 1000;
        pool.apply_deltas(&h(1), &mut priority, &mut fee);
        assert_eq!(priority, 3.0);
        assert_eq!(fee, 1070);

        pool.clear_prioritisation(&h(1));
        let mut priority = 0.0;
        let mut fee: Amount = 0;
        pool.apply_deltas(&h(1), &mut priority, &mut fee);
        assert_eq!(priority, 0.0);
        assert_eq!(fee, 0);
    }

    // ------------------------------------------------------------------
    // Wallet notification
    // ------------------------------------------------------------------

    #[test]
    fn notify_drains_queue_once() {
        let pool = pool();
        let tx = make_tx(&[op(1, 0)], 1);
        add_tx(&pool, &tx);
        add_cert(&pool, &make_cert(h(0xA0), 1, 10, &[op(2, 0)]));
        assert!(!pool.is_fully_notified());

        let mut seen = Vec::new();
        pool.notify_recently_added(|payload| seen.push(payload.hash()));
        assert_eq!(seen.len(), 2);
        assert!(pool.is_fully_notified());

        let mut second = Vec::new();
        pool.notify_recently_added(|payload| second.push(payload.hash()));
        assert!(second.is_empty());
    }

    #[test]
    fn removed_entries_are_not_notified() {
        let pool = pool();
        let tx = make_tx(&[op(1, 0)], 1);
        add_tx(&pool, &tx);
        pool.remove_tx(&tx, false);

        let mut seen = Vec::new();
        pool.notify_recently_added(|payload| seen.push(payload.hash()));
        assert!(seen.is_empty());
    }

    #[test]
    fn remove_cert_and_sync_reports_evictions() {
        let pool = pool();
        let cert = make_cert(h(0xA0), 1, 10, &[op(1, 0)]);
        add_cert(&pool, &cert);
        let spender = make_tx(&[OutPoint { txid: cert.hash(), index: 0 }], 1);
        add_tx(&pool, &spender);

        let mut seen = Vec::new();
        pool.remove_cert_and_sync(&cert.hash(), |payload| seen.push(payload.hash()));
        assert!(seen.contains(&cert.hash()));
        assert!(seen.contains(&spender.hash()));
        assert_eq!(pool.cert_count(), 0);
        assert_eq!(pool.size(), 0);
    }

    // ------------------------------------------------------------------
    // Misc queries
    // ------------------------------------------------------------------

    #[test]
    fn has_no_inputs_of_detects_pool_parents() {
        let pool = pool();
        let parent = make_tx(&[op(1, 0)], 1);
        add_tx(&pool, &parent);

        let child = make_tx(&[OutPoint { txid: parent.hash(), index: 0 }], 1);
        assert!(!pool.has_no_inputs_of(&child));

        let stranger = make_tx(&[op(9, 0)], 1);
        assert!(pool.has_no_inputs_of(&stranger));
    }

    #[test]
    fn prune_spent_strips_pool_spent_outputs() {
        let pool = pool();
        let parent = make_tx(&[op(1, 0)], 2);
        let child = make_tx(&[OutPoint { txid: parent.hash(), index: 1 }], 1);
        add_tx(&pool, &parent);
        add_tx(&pool, &child);

        let mut coins = Coins::from_tx(&parent, 10);
        pool.prune_spent(&parent.hash(), &mut coins);
        assert!(coins.is_available(0));
        assert!(!coins.is_available(1));
    }

    // ------------------------------------------------------------------
    // Structural audit
    // ------------------------------------------------------------------

    #[test]
    fn check_passes_on_consistent_pool() {
        let view = MockView::new().with_coins(1, 1).with_coins(2, 1);
        let pool = pool();
        let t1 = make_tx(&[op(1, 0)], 2);
        let t2 = make_tx(&[OutPoint { txid: t1.hash(), index: 0 }], 1);
        let cert = make_cert(h(0xA0), 1, 10, &[op(2, 0)]);
        add_tx(&pool, &t1);
        add_tx(&pool, &t2);
        add_cert(&pool, &cert);

        pool.check(&view);

        pool.remove_tx(&t1, true);
        pool.check(&view);
    }

    #[test]
    #[should_panic(expected = "unknown to chain")]
    fn check_rejects_unknown_inputs() {
        let view = MockView::new();
        let pool = pool();
        add_tx(&pool, &make_tx(&[op(1, 0)], 1));
        pool.check(&view);
    }

    #[test]
    fn check_if_enabled_respects_config() {
        let view = MockView::new();

        // Disabled (default): the audit is skipped even though this pool
        // would fail it.
        let silent = pool();
        add_tx(&silent, &make_tx(&[op(1, 0)], 1));
        silent.check_if_enabled(&view);

        // Enabled: the audit runs and passes on a consistent pool.
        let audited = Mempool::new(&MempoolConfig {
            run_expensive_checks: true,
            ..MempoolConfig::default()
        });
        audited.check_if_enabled(&view);
    }

    #[test]
    #[should_panic(expected = "added twice")]
    fn double_add_is_fatal() {
        let pool = pool();
        let tx = make_tx(&[op(1, 0)], 1);
        add_tx(&pool, &tx);
        add_tx(&pool, &tx);
    }

    #[test]
    #[should_panic(expected = "two pool certificates at quality")]
    fn duplicate_quality_is_fatal() {
        let pool = pool();
        add_cert(&pool, &make_cert(h(0xA0), 1, 10, &[op(1, 0)]));
        add_cert(&pool, &make_cert(h(0xA0), 2, 10, &[op(2, 0)]));
    }

    #[test]
    fn btr_snapshot_recorded_from_caller_map() {
        let pool = pool();
        let mut tx = make_tx(&[op(1, 0)], 1);
        tx.btr_requests.push(harbor_core::types::BtrRequestOut {
            sc_id: h(0xA0),
            sc_fee: 10,
        });
        let mut snapshots = BTreeMap::new();
        snapshots.insert(h(0xA0), h(0xCD));
        add_tx_with_snapshots(&pool, &tx, &snapshots);
        assert!(pool.has_sidechain_row(&h(0xA0)));

        // Removing the only BTR clears the row entirely.
        pool.remove_tx(&tx, false);
        assert!(!pool.has_sidechain_row(&h(0xA0)));
    }
}

//! Trait interfaces between the Harbor crates.
//!
//! [`ChainView`] is the read-only contract the mempool consumes: coin,
//! nullifier, and sidechain lookups against committed state. The host node
//! implements it over its chainstate; the mempool crate layers a pool-aware
//! composite on top of it.

use std::collections::BTreeSet;

use crate::types::{Coins, Hash256, ScId, Sidechain, SidechainState};

/// Read-only view of committed chain state.
///
/// Lookups are infallible by contract: a failing backend must surface as
/// absence, never as a panic inside pool operations.
pub trait ChainView: Send + Sync {
    /// Unspent outputs of the transaction or certificate `txid`, if any.
    fn get_coins(&self, txid: &Hash256) -> Option<Coins>;

    /// Whether any unspent output of `txid` exists.
    fn have_coins(&self, txid: &Hash256) -> bool {
        self.get_coins(txid).is_some()
    }

    /// Whether a shielded nullifier has been spent.
    fn get_nullifier(&self, nullifier: &Hash256) -> bool;

    /// Whether the sidechain exists in committed state.
    fn have_sidechain(&self, sc_id: &ScId) -> bool;

    /// The committed sidechain record, if any.
    fn get_sidechain(&self, sc_id: &ScId) -> Option<Sidechain>;

    /// Lifecycle state of a sidechain.
    fn sidechain_state(&self, sc_id: &ScId) -> SidechainState;

    /// Data hash of the sidechain's currently active certificate.
    fn active_cert_data_hash(&self, sc_id: &ScId) -> Option<Hash256>;

    /// Whether a certificate for `(sc_id, epoch)` is acceptable at the
    /// current tip (submission window still open).
    fn check_cert_timing(&self, sc_id: &ScId, epoch: u32) -> bool;

    /// Whether a sidechain transaction (forward transfer or backward-transfer
    /// request) targeting `sc_id` is acceptable at the current tip.
    fn check_sc_tx_timing(&self, sc_id: &ScId) -> bool;

    /// Whether `anchor` is a known note-commitment-tree root.
    fn have_anchor(&self, anchor: &Hash256) -> bool;

    /// Whether a CSW nullifier has been spent for the given sidechain.
    fn have_csw_nullifier(&self, sc_id: &ScId, nullifier: &Hash256) -> bool;

    /// Collect the ids of all known sidechains into `out`.
    fn sc_ids(&self, out: &mut BTreeSet<ScId>);

    /// Height of the current chain tip.
    fn height(&self) -> u32;
}

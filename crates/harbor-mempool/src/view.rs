//! Pool-over-chain composite view.
//!
//! Layers the mempool on top of a committed [`ChainView`]: lookups answer
//! from the pool first (at [`MEMPOOL_HEIGHT`]) and fall back to the chain,
//! and sidechain balances are reduced by the pool's pending CSW totals.

use std::collections::BTreeSet;

use harbor_core::constants::MEMPOOL_HEIGHT;
use harbor_core::traits::ChainView;
use harbor_core::types::{Coins, Hash256, ScId, Sidechain, SidechainState};

use crate::pool::Mempool;

/// A [`ChainView`] that sees both the pool and the committed chain.
pub struct MempoolCoinsView<'a> {
    base: &'a dyn ChainView,
    pool: &'a Mempool,
}

impl<'a> MempoolCoinsView<'a> {
    pub fn new(base: &'a dyn ChainView, pool: &'a Mempool) -> Self {
        Self { base, pool }
    }
}

impl ChainView for MempoolCoinsView<'_> {
    /// Pool entries win: they can never conflict with the committed state
    /// and are never pruned, whereas consulting the chain first could
    /// surface a pruned record.
    fn get_coins(&self, txid: &Hash256) -> Option<Coins> {
        if let Some(tx) = self.pool.lookup_tx(txid) {
            return Some(Coins::from_tx(&tx, MEMPOOL_HEIGHT));
        }
        if let Some(cert) = self.pool.lookup_cert(txid) {
            // Only the top-quality pool certificate of a sidechain exposes
            // spendable backward transfers.
            let top_quality = self.pool.top_quality_cert(&cert.sc_id) == Some(*txid);
            return Some(Coins::from_cert(
                &cert,
                MEMPOOL_HEIGHT,
                MEMPOOL_HEIGHT,
                top_quality,
            ));
        }
        self.base
            .get_coins(txid)
            .filter(|coins| !coins.is_pruned())
    }

    fn have_coins(&self, txid: &Hash256) -> bool {
        self.pool.exists(txid) || self.base.have_coins(txid)
    }

    fn get_nullifier(&self, nullifier: &Hash256) -> bool {
        self.pool.contains_nullifier(nullifier) || self.base.get_nullifier(nullifier)
    }

    fn have_sidechain(&self, sc_id: &ScId) -> bool {
        self.pool.has_sidechain_creation_tx(sc_id) || self.base.have_sidechain(sc_id)
    }

    /// Synthesize a record from an unconfirmed pool creation if there is
    /// one, otherwise read the chain; either way the balance is reduced by
    /// the pool's pending CSW total (withdrawals drain it).
    fn get_sidechain(&self, sc_id: &ScId) -> Option<Sidechain> {
        let mut info = match self.pool.sidechain_creation_hash(sc_id) {
            Some(creation_hash) => {
                let creation_tx = self
                    .pool
                    .lookup_tx(&creation_hash)
                    .expect("sidechain row references missing creation tx");
                let declared = creation_tx
                    .sc_creations
                    .iter()
                    .find(|sc| sc.sc_id == *sc_id)
                    .expect("creation tx does not declare its sidechain");
                Sidechain {
                    creation_block_height: -1,
                    creation_tx_hash: creation_hash,
                    balance: 0,
                    withdrawal_epoch_length: declared.withdrawal_epoch_length,
                    active_cert_data_hash: None,
                }
            }
            None => self.base.get_sidechain(sc_id)?,
        };

        let pending_csw = self.pool.csw_total_amount(sc_id);
        if pending_csw > 0 {
            info.balance = info.balance.saturating_sub(pending_csw);
        }
        Some(info)
    }

    fn sidechain_state(&self, sc_id: &ScId) -> SidechainState {
        if self.pool.has_sidechain_creation_tx(sc_id) {
            return SidechainState::Unconfirmed;
        }
        self.base.sidechain_state(sc_id)
    }

    fn active_cert_data_hash(&self, sc_id: &ScId) -> Option<Hash256> {
        self.base.active_cert_data_hash(sc_id)
    }

    fn check_cert_timing(&self, sc_id: &ScId, epoch: u32) -> bool {
        self.base.check_cert_timing(sc_id, epoch)
    }

    fn check_sc_tx_timing(&self, sc_id: &ScId) -> bool {
        self.base.check_sc_tx_timing(sc_id)
    }

    fn have_anchor(&self, anchor: &Hash256) -> bool {
        self.base.have_anchor(anchor)
    }

    fn have_csw_nullifier(&self, sc_id: &ScId, nullifier: &Hash256) -> bool {
        self.pool.have_csw_nullifier(sc_id, nullifier)
            || self.base.have_csw_nullifier(sc_id, nullifier)
    }

    fn sc_ids(&self, out: &mut BTreeSet<ScId>) {
        self.base.sc_ids(out);
        self.pool.pool_sc_ids(out);
    }

    fn height(&self) -> u32 {
        self.base.height()
    }
}

//! Per-sidechain aggregate state kept beside the pool's main tables.

use std::collections::{BTreeMap, BTreeSet};

use harbor_core::amount::Amount;
use harbor_core::types::Hash256;

/// Everything the pool currently knows about one sidechain: its unconfirmed
/// creation, forward transfers, backward-transfer requests, CSW inputs, and
/// competing backward certificates keyed by quality.
///
/// A row exists only while some pool entry references the sidechain;
/// [`is_null`](Self::is_null) decides when it may be erased.
#[derive(Debug, Clone, Default)]
pub struct SidechainMempoolEntry {
    /// The unconfirmed creation transaction, if it is in this pool.
    pub sc_creation_tx: Option<Hash256>,
    /// Pool transactions carrying forward transfers to this sidechain.
    pub fwd_tx_hashes: BTreeSet<Hash256>,
    /// Pool transactions carrying backward-transfer requests.
    pub btr_tx_hashes: BTreeSet<Hash256>,
    /// Active-cert-data-hash snapshot taken when the first BTR arrived;
    /// BTRs go stale when the chain-side value moves away from it.
    pub btr_cert_data_hash: Option<Hash256>,
    /// CSW nullifier -> pool transaction claiming it.
    pub csw_nullifiers: BTreeMap<Hash256, Hash256>,
    /// Running sum of all pending CSW values for this sidechain.
    pub csw_total_amount: Amount,
    /// Backward certificates by quality; the last entry is the top quality.
    pub backward_certificates: BTreeMap<i64, Hash256>,
}

impl SidechainMempoolEntry {
    /// Hash of the top-quality certificate, if any.
    pub fn top_quality_cert(&self) -> Option<&Hash256> {
        self.backward_certificates
            .last_key_value()
            .map(|(_, hash)| hash)
    }

    /// Certificate at exactly `quality`, if any.
    pub fn cert_with_quality(&self, quality: i64) -> Option<&Hash256> {
        self.backward_certificates.get(&quality)
    }

    /// Whether `hash` is one of this sidechain's pool certificates.
    pub fn has_cert(&self, hash: &Hash256) -> bool {
        self.backward_certificates.values().any(|h| h == hash)
    }

    /// Drop `hash` from the backward-certificate table wherever it appears.
    pub fn erase_cert(&mut self, hash: &Hash256) {
        self.backward_certificates.retain(|_, h| h != hash);
    }

    /// Whether nothing references this sidechain any more; only then may
    /// the row be erased.
    pub fn is_null(&self) -> bool {
        self.sc_creation_tx.is_none()
            && self.fwd_tx_hashes.is_empty()
            && self.btr_tx_hashes.is_empty()
            && self.csw_nullifiers.is_empty()
            && self.csw_total_amount == 0
            && self.backward_certificates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_row_is_null() {
        assert!(SidechainMempoolEntry::default().is_null());
    }

    #[test]
    fn any_reference_makes_row_non_null() {
        let mut row = SidechainMempoolEntry::default();
        row.fwd_tx_hashes.insert(Hash256([1; 32]));
        assert!(!row.is_null());

        let mut row = SidechainMempoolEntry::default();
        row.sc_creation_tx = Some(Hash256([1; 32]));
        assert!(!row.is_null());

        let mut row = SidechainMempoolEntry::default();
        row.csw_total_amount = 5;
        assert!(!row.is_null());
    }

    #[test]
    fn top_quality_is_highest_key() {
        let mut row = SidechainMempoolEntry::default();
        row.backward_certificates.insert(10, Hash256([0x0A; 32]));
        row.backward_certificates.insert(30, Hash256([0x1E; 32]));
        row.backward_certificates.insert(20, Hash256([0x14; 32]));
        assert_eq!(row.top_quality_cert(), Some(&Hash256([0x1E; 32])));
    }

    #[test]
    fn negative_quality_orders_below_positive() {
        let mut row = SidechainMempoolEntry::default();
        row.backward_certificates.insert(-5, Hash256([0x01; 32]));
        row.backward_certificates.insert(3, Hash256([0x02; 32]));
        assert_eq!(row.top_quality_cert(), Some(&Hash256([0x02; 32])));
    }

    #[test]
    fn erase_cert_removes_all_occurrences() {
        let mut row = SidechainMempoolEntry::default();
        row.backward_certificates.insert(1, Hash256([0x01; 32]));
        row.backward_certificates.insert(2, Hash256([0x02; 32]));
        row.erase_cert(&Hash256([0x01; 32]));
        assert!(!row.has_cert(&Hash256([0x01; 32])));
        assert!(row.has_cert(&Hash256([0x02; 32])));
    }

    #[test]
    fn cert_with_quality_exact_lookup() {
        let mut row = SidechainMempoolEntry::default();
        row.backward_certificates.insert(7, Hash256([0x07; 32]));
        assert_eq!(row.cert_with_quality(7), Some(&Hash256([0x07; 32])));
        assert_eq!(row.cert_with_quality(8), None);
    }
}

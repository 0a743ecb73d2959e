//! Pool entries: accounting wrappers around owned payloads.
//!
//! An entry owns its transaction or certificate (shared via `Arc` so the
//! recently-added queue and removal lists can hold the payload after the
//! entry dies) and precomputes everything the pool needs: id, serialized
//! size, modified size for priority, and an estimate of heap footprint.

use std::mem;
use std::sync::Arc;

use harbor_core::amount::Amount;
use harbor_core::types::{Certificate, Hash256, Transaction, TxInput};

/// A transaction resident in the pool, with admission-time accounting.
#[derive(Debug, Clone)]
pub struct TxMempoolEntry {
    tx: Arc<Transaction>,
    hash: Hash256,
    fee: Amount,
    tx_size: usize,
    mod_size: usize,
    usage_size: usize,
    time: i64,
    base_priority: f64,
    height: u32,
    had_no_dependencies: bool,
}

impl TxMempoolEntry {
    /// Wrap a validated transaction for admission.
    ///
    /// `height` is the chain height at admission; `had_no_dependencies`
    /// records whether the pool held none of the transaction's inputs at
    /// that moment.
    pub fn new(
        tx: Transaction,
        fee: Amount,
        time: i64,
        base_priority: f64,
        height: u32,
        had_no_dependencies: bool,
    ) -> Self {
        let hash = tx.hash();
        let tx_size = tx.serialized_size();
        let mod_size = tx.modified_size(tx_size);
        let usage_size = tx_dynamic_usage(&tx);
        Self {
            tx: Arc::new(tx),
            hash,
            fee,
            tx_size,
            mod_size,
            usage_size,
            time,
            base_priority,
            height,
            had_no_dependencies,
        }
    }

    pub fn tx(&self) -> &Arc<Transaction> {
        &self.tx
    }

    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn tx_size(&self) -> usize {
        self.tx_size
    }

    pub fn usage_size(&self) -> usize {
        self.usage_size
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn had_no_dependencies(&self) -> bool {
        self.had_no_dependencies
    }

    /// Priority at `current_height`: the admission-time priority plus an
    /// aging term proportional to the coin-value moved. `value_out + fee`
    /// accounts indirectly for CSW input amounts as well.
    pub fn priority(&self, current_height: u32) -> f64 {
        let value_in = self.tx.total_output_value().saturating_add(self.fee);
        let aged = current_height.saturating_sub(self.height);
        self.base_priority + (aged as f64 * value_in as f64) / self.mod_size as f64
    }
}

/// A certificate resident in the pool, with admission-time accounting.
#[derive(Debug, Clone)]
pub struct CertMempoolEntry {
    cert: Arc<Certificate>,
    hash: Hash256,
    fee: Amount,
    cert_size: usize,
    usage_size: usize,
    time: i64,
    base_priority: f64,
    height: u32,
}

impl CertMempoolEntry {
    /// Wrap a validated certificate for admission.
    pub fn new(
        cert: Certificate,
        fee: Amount,
        time: i64,
        base_priority: f64,
        height: u32,
    ) -> Self {
        let hash = cert.hash();
        let cert_size = cert.serialized_size();
        let usage_size = cert_dynamic_usage(&cert);
        Self {
            cert: Arc::new(cert),
            hash,
            fee,
            cert_size,
            usage_size,
            time,
            base_priority,
            height,
        }
    }

    pub fn cert(&self) -> &Arc<Certificate> {
        &self.cert
    }

    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn cert_size(&self) -> usize {
        self.cert_size
    }

    pub fn usage_size(&self) -> usize {
        self.usage_size
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Certificates ride at their admission priority; they do not age.
    pub fn priority(&self, _current_height: u32) -> f64 {
        self.base_priority
    }
}

/// A payload leaving the pool or queued for wallet notification.
///
/// Shared ownership: the pool entry, the recently-added queue, and removal
/// lists may all hold the same `Arc`.
#[derive(Debug, Clone)]
pub enum MempoolPayload {
    Tx(Arc<Transaction>),
    Cert(Arc<Certificate>),
}

impl MempoolPayload {
    pub fn hash(&self) -> Hash256 {
        match self {
            Self::Tx(tx) => tx.hash(),
            Self::Cert(cert) => cert.hash(),
        }
    }

    pub fn inputs(&self) -> &[TxInput] {
        match self {
            Self::Tx(tx) => &tx.inputs,
            Self::Cert(cert) => &cert.inputs,
        }
    }

    pub fn output_count(&self) -> usize {
        match self {
            Self::Tx(tx) => tx.outputs.len(),
            Self::Cert(cert) => cert.outputs.len(),
        }
    }

    pub fn is_certificate(&self) -> bool {
        matches!(self, Self::Cert(_))
    }
}

/// Rough heap footprint of a transaction: the payload struct plus every
/// owned allocation at its current capacity.
fn tx_dynamic_usage(tx: &Transaction) -> usize {
    let mut usage = mem::size_of::<Transaction>();
    usage += inputs_usage(&tx.inputs);
    usage += tx.outputs.capacity() * mem::size_of::<harbor_core::types::TxOutput>();
    for js in &tx.joinsplits {
        usage += mem::size_of_val(js);
        usage += js.nullifiers.capacity() * 32;
        usage += js.commitments.capacity() * 32;
    }
    usage += tx.csw_inputs.capacity() * mem::size_of::<harbor_core::types::CswInput>();
    usage += tx.sc_creations.capacity() * mem::size_of::<harbor_core::types::ScCreationOut>();
    usage +=
        tx.forward_transfers.capacity() * mem::size_of::<harbor_core::types::ForwardTransferOut>();
    usage += tx.btr_requests.capacity() * mem::size_of::<harbor_core::types::BtrRequestOut>();
    usage
}

/// Rough heap footprint of a certificate.
fn cert_dynamic_usage(cert: &Certificate) -> usize {
    let mut usage = mem::size_of::<Certificate>();
    usage += inputs_usage(&cert.inputs);
    usage += cert.outputs.capacity() * mem::size_of::<harbor_core::types::TxOutput>();
    usage
}

fn inputs_usage(inputs: &[TxInput]) -> usize {
    let mut usage = inputs.len() * mem::size_of::<TxInput>();
    for input in inputs {
        usage += input.signature.capacity() + input.public_key.capacity();
    }
    usage
}

//! Core payload types: transactions, certificates, coins, sidechains.
//!
//! All monetary values are in grains (1 HBR = 10^8 grains). Hashing uses
//! BLAKE3 over an explicit canonical byte layout so that ids never depend
//! on a serializer and cannot fail.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::amount::Amount;
use crate::constants::COINBASE_MATURITY;

/// A 32-byte hash value.
///
/// Used for transaction and certificate ids, sidechain ids, shielded
/// nullifiers, anchors, and cert-data-hash snapshots.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for null outpoints.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Sidechain identifier.
pub type ScId = Hash256;

/// Reference to a specific output of a previous transaction or certificate.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Id of the transaction or certificate containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within its owner.
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// Locator of the pool entry spending an outpoint: spender hash plus the
/// index of the input doing the spend. Hashes, not references, so the
/// locator stays valid while entries move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputLocator {
    /// Hash of the spending transaction or certificate.
    pub spender: Hash256,
    /// Index of the spending input within the spender's input list.
    pub vin_index: u32,
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
    /// Signature bytes. Empty for coinbase inputs.
    pub signature: Vec<u8>,
    /// Public key bytes. Empty for coinbase inputs.
    pub public_key: Vec<u8>,
}

/// A transaction output, creating a new coin.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in grains.
    pub value: Amount,
    /// Hash of the recipient's public key.
    pub pubkey_hash: Hash256,
}

/// A shielded joinsplit: consumes notes identified by nullifiers anchored
/// at a note-commitment-tree root, producing new commitments.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct JoinSplit {
    /// Merkle root the consumed notes are proven against.
    pub anchor: Hash256,
    /// One-time spend tags of the consumed notes.
    pub nullifiers: Vec<Hash256>,
    /// Commitments of the produced notes.
    pub commitments: Vec<Hash256>,
}

/// A ceased-sidechain withdrawal input: pulls `value` out of a sidechain
/// that has entered the CEASED state, tagged by a unique nullifier.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CswInput {
    /// The ceased sidechain being withdrawn from.
    pub sc_id: ScId,
    /// One-time withdrawal tag.
    pub nullifier: Hash256,
    /// Withdrawn value in grains.
    pub value: Amount,
}

/// A sidechain-creation output: declares a new sidechain and deposits its
/// initial balance.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct ScCreationOut {
    /// Id of the declared sidechain.
    pub sc_id: ScId,
    /// Initial deposit in grains.
    pub value: Amount,
    /// Length of the sidechain's withdrawal epochs, in mainchain blocks.
    pub withdrawal_epoch_length: u32,
}

/// A forward transfer output: deposits value into an existing sidechain.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct ForwardTransferOut {
    /// The receiving sidechain.
    pub sc_id: ScId,
    /// Deposited value in grains.
    pub value: Amount,
}

/// A mainchain backward-transfer request output: asks a sidechain to
/// perform a withdrawal in its next certificate.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BtrRequestOut {
    /// The sidechain asked to withdraw.
    pub sc_id: ScId,
    /// Fee offered to the sidechain for serving the request, in grains.
    pub sc_fee: Amount,
}

/// A mainchain transaction, possibly carrying sidechain and shielded parts.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u32,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Shielded joinsplits.
    pub joinsplits: Vec<JoinSplit>,
    /// Ceased-sidechain withdrawal inputs.
    pub csw_inputs: Vec<CswInput>,
    /// Sidechain declarations.
    pub sc_creations: Vec<ScCreationOut>,
    /// Forward transfers into sidechains.
    pub forward_transfers: Vec<ForwardTransferOut>,
    /// Backward-transfer requests.
    pub btr_requests: Vec<BtrRequestOut>,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: u32,
}

impl Transaction {
    /// Compute the transaction id (BLAKE3 over the canonical encoding).
    pub fn hash(&self) -> Hash256 {
        let mut bytes = Vec::with_capacity(self.serialized_size());
        self.write_canonical(&mut bytes);
        Hash256(blake3::hash(&bytes).into())
    }

    /// Check if this is a coinbase transaction (single input with null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].previous_output.is_null()
            && self.csw_inputs.is_empty()
            && self.joinsplits.is_empty()
    }

    /// Whether this transaction touches any sidechain.
    pub fn spends_sidechains(&self) -> bool {
        !self.csw_inputs.is_empty()
            || !self.sc_creations.is_empty()
            || !self.forward_transfers.is_empty()
            || !self.btr_requests.is_empty()
    }

    /// Sum of all transparent output values. Saturating.
    pub fn total_output_value(&self) -> Amount {
        self.outputs
            .iter()
            .fold(0, |acc: Amount, out| acc.saturating_add(out.value))
    }

    /// Sum of all ceased-sidechain withdrawal input values. Saturating.
    pub fn total_csw_value(&self) -> Amount {
        self.csw_inputs
            .iter()
            .fold(0, |acc: Amount, csw| acc.saturating_add(csw.value))
    }

    /// Serialized size in bytes of the canonical encoding.
    pub fn serialized_size(&self) -> usize {
        let mut bytes = Vec::new();
        self.write_canonical(&mut bytes);
        bytes.len()
    }

    /// Size used for priority computation: the serialized size minus a
    /// per-input allowance for signature data, so that priority does not
    /// penalize the bytes a spender cannot avoid.
    pub fn modified_size(&self, tx_size: usize) -> usize {
        let mut size = tx_size;
        for input in &self.inputs {
            let offset = 41 + (input.signature.len() + input.public_key.len()).min(110);
            if size > offset {
                size -= offset;
            }
        }
        size.max(1)
    }

    fn write_canonical(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        write_inputs(out, &self.inputs);
        write_outputs(out, &self.outputs);
        write_len(out, self.joinsplits.len());
        for js in &self.joinsplits {
            out.extend_from_slice(js.anchor.as_bytes());
            write_hashes(out, &js.nullifiers);
            write_hashes(out, &js.commitments);
        }
        write_len(out, self.csw_inputs.len());
        for csw in &self.csw_inputs {
            out.extend_from_slice(csw.sc_id.as_bytes());
            out.extend_from_slice(csw.nullifier.as_bytes());
            out.extend_from_slice(&csw.value.to_le_bytes());
        }
        write_len(out, self.sc_creations.len());
        for sc in &self.sc_creations {
            out.extend_from_slice(sc.sc_id.as_bytes());
            out.extend_from_slice(&sc.value.to_le_bytes());
            out.extend_from_slice(&sc.withdrawal_epoch_length.to_le_bytes());
        }
        write_len(out, self.forward_transfers.len());
        for fwd in &self.forward_transfers {
            out.extend_from_slice(fwd.sc_id.as_bytes());
            out.extend_from_slice(&fwd.value.to_le_bytes());
        }
        write_len(out, self.btr_requests.len());
        for btr in &self.btr_requests {
            out.extend_from_slice(btr.sc_id.as_bytes());
            out.extend_from_slice(&btr.sc_fee.to_le_bytes());
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }
}

/// A sidechain certificate: authorizes backward transfers for one epoch of
/// one sidechain. Outputs before `first_bwt_index` are ordinary change;
/// outputs from `first_bwt_index` on are backward transfers, which must
/// mature on chain before they can be spent.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Certificate {
    /// Protocol version.
    pub version: u32,
    /// The certified sidechain.
    pub sc_id: ScId,
    /// Withdrawal epoch this certificate closes.
    pub epoch_number: u32,
    /// Quality scalar; among competing certificates for the same
    /// (sidechain, epoch), highest quality wins.
    pub quality: i64,
    /// Inputs funding the certificate's fee and change.
    pub inputs: Vec<TxInput>,
    /// Change outputs followed by backward-transfer outputs.
    pub outputs: Vec<TxOutput>,
    /// Index of the first backward-transfer output.
    pub first_bwt_index: usize,
}

impl Certificate {
    /// Compute the certificate id (BLAKE3 over the canonical encoding).
    pub fn hash(&self) -> Hash256 {
        let mut bytes = Vec::with_capacity(self.serialized_size());
        self.write_canonical(&mut bytes);
        Hash256(blake3::hash(&bytes).into())
    }

    /// Whether the output at `index` is a backward transfer (as opposed to
    /// change).
    pub fn is_backward_transfer(&self, index: u32) -> bool {
        (index as usize) >= self.first_bwt_index
    }

    /// Serialized size in bytes of the canonical encoding.
    pub fn serialized_size(&self) -> usize {
        let mut bytes = Vec::new();
        self.write_canonical(&mut bytes);
        bytes.len()
    }

    /// Size used for priority computation; see [`Transaction::modified_size`].
    pub fn modified_size(&self, cert_size: usize) -> usize {
        let mut size = cert_size;
        for input in &self.inputs {
            let offset = 41 + (input.signature.len() + input.public_key.len()).min(110);
            if size > offset {
                size -= offset;
            }
        }
        size.max(1)
    }

    fn write_canonical(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(self.sc_id.as_bytes());
        out.extend_from_slice(&self.epoch_number.to_le_bytes());
        out.extend_from_slice(&self.quality.to_le_bytes());
        write_inputs(out, &self.inputs);
        write_outputs(out, &self.outputs);
        write_len(out, self.first_bwt_index);
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u32).to_le_bytes());
}

fn write_hashes(out: &mut Vec<u8>, hashes: &[Hash256]) {
    write_len(out, hashes.len());
    for h in hashes {
        out.extend_from_slice(h.as_bytes());
    }
}

fn write_inputs(out: &mut Vec<u8>, inputs: &[TxInput]) {
    write_len(out, inputs.len());
    for input in inputs {
        out.extend_from_slice(input.previous_output.txid.as_bytes());
        out.extend_from_slice(&input.previous_output.index.to_le_bytes());
        write_len(out, input.signature.len());
        out.extend_from_slice(&input.signature);
        write_len(out, input.public_key.len());
        out.extend_from_slice(&input.public_key);
    }
}

fn write_outputs(out: &mut Vec<u8>, outputs: &[TxOutput]) {
    write_len(out, outputs.len());
    for output in outputs {
        out.extend_from_slice(&output.value.to_le_bytes());
        out.extend_from_slice(output.pubkey_hash.as_bytes());
    }
}

/// Lifecycle state of a sidechain as seen by the committed chain.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SidechainState {
    /// No such sidechain.
    NotApplicable,
    /// Declared only by an unconfirmed transaction.
    Unconfirmed,
    /// Confirmed and producing certificates.
    Alive,
    /// Ceased; only CSW inputs may drain its balance.
    Ceased,
}

/// A sidechain record, either committed or synthesized from an unconfirmed
/// creation (in which case `creation_block_height` is -1).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Sidechain {
    /// Height of the block confirming the creation, or -1 if unconfirmed.
    pub creation_block_height: i64,
    /// Hash of the creating transaction.
    pub creation_tx_hash: Hash256,
    /// Current balance in grains.
    pub balance: Amount,
    /// Length of withdrawal epochs, in mainchain blocks.
    pub withdrawal_epoch_length: u32,
    /// Data hash of the currently active certificate, if any.
    pub active_cert_data_hash: Option<Hash256>,
}

/// Unspent outputs of one transaction or certificate, annotated with the
/// maturity information needed to decide spendability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coins {
    /// Outputs; `None` marks a spent or unavailable slot.
    pub outputs: Vec<Option<TxOutput>>,
    /// Height of the confirming block, or `MEMPOOL_HEIGHT` if unconfirmed.
    pub height: u32,
    /// Whether these outputs come from a coinbase.
    pub is_coinbase: bool,
    /// Whether these outputs come from a certificate.
    pub from_cert: bool,
    /// For certificate coins, the index of the first backward transfer.
    pub first_bwt_index: usize,
    /// Height at which backward-transfer outputs become spendable.
    pub bwt_maturity_height: u32,
}

impl Coins {
    /// Coins view of an unspent transaction confirmed (or pooled) at `height`.
    pub fn from_tx(tx: &Transaction, height: u32) -> Self {
        Self {
            outputs: tx.outputs.iter().cloned().map(Some).collect(),
            height,
            is_coinbase: tx.is_coinbase(),
            from_cert: false,
            first_bwt_index: usize::MAX,
            bwt_maturity_height: 0,
        }
    }

    /// Coins view of an unspent certificate.
    ///
    /// A certificate that is not the top-quality one for its sidechain
    /// exposes no backward-transfer outputs: a better competitor would void
    /// them. Change outputs are always visible.
    pub fn from_cert(
        cert: &Certificate,
        height: u32,
        bwt_maturity_height: u32,
        top_quality: bool,
    ) -> Self {
        let outputs = cert
            .outputs
            .iter()
            .enumerate()
            .map(|(i, out)| {
                if !top_quality && cert.is_backward_transfer(i as u32) {
                    None
                } else {
                    Some(out.clone())
                }
            })
            .collect();
        Self {
            outputs,
            height,
            is_coinbase: false,
            from_cert: true,
            first_bwt_index: cert.first_bwt_index,
            bwt_maturity_height,
        }
    }

    /// Whether the output at `index` exists and is unspent.
    pub fn is_available(&self, index: u32) -> bool {
        self.outputs
            .get(index as usize)
            .is_some_and(|slot| slot.is_some())
    }

    /// Whether the output at `index` may be spent at `spend_height`.
    ///
    /// Coinbase outputs need `COINBASE_MATURITY` confirmations; certificate
    /// backward transfers wait for `bwt_maturity_height`; everything else is
    /// immediately mature.
    pub fn is_output_mature(&self, index: u32, spend_height: u32) -> bool {
        if self.is_coinbase {
            return self.height.saturating_add(COINBASE_MATURITY) <= spend_height;
        }
        if self.from_cert && (index as usize) >= self.first_bwt_index {
            return self.bwt_maturity_height <= spend_height;
        }
        true
    }

    /// Mark the output at `index` as spent.
    pub fn spend(&mut self, index: u32) {
        if let Some(slot) = self.outputs.get_mut(index as usize) {
            *slot = None;
        }
    }

    /// Whether every output has been spent.
    pub fn is_pruned(&self) -> bool {
        self.outputs.iter().all(|slot| slot.is_none())
    }
}

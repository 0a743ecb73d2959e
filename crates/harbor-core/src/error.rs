//! Error types shared across the Harbor crates.
use thiserror::Error;

/// Reasons an incoming transaction or certificate is refused admission.
///
/// These are diagnostics, not faults: callers log the reason and drop the
/// candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("already in pool: {0}")] AlreadyInPool(String),
    #[error("{candidate} double spends outpoint {outpoint} held by {existing}")] DoubleSpend { candidate: String, existing: String, outpoint: String },
    #[error("{candidate} spends backward-transfer output {outpoint} of an unconfirmed certificate")] SpendsUnconfirmedBwt { candidate: String, outpoint: String },
    #[error("shielded nullifier {0} already claimed in pool")] NullifierClash(String),
    #[error("csw nullifier {nullifier} for sidechain {sc_id} already claimed in pool")] CswNullifierClash { sc_id: String, nullifier: String },
    #[error("sidechain {0} already declared by an unconfirmed transaction")] SidechainRedeclaration(String),
    #[error("certificate {candidate} (quality {quality}) depends on pool certificate {ancestor} of quality {ancestor_quality}")] QualityDependency { candidate: String, quality: i64, ancestor: String, ancestor_quality: i64 },
}

/// Failures of the estimator snapshot round-trip. Logged, non-fatal.
#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("snapshot requires client version {required}, this client is {current}")] UpVersion { required: u32, current: u32 },
    #[error("snapshot encoding: {0}")] Encoding(String),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_errors_display() {
        let errors: Vec<AdmissionError> = vec![
            AdmissionError::AlreadyInPool("ab".into()),
            AdmissionError::DoubleSpend {
                candidate: "a".into(),
                existing: "b".into(),
                outpoint: "c:0".into(),
            },
            AdmissionError::NullifierClash("nf".into()),
            AdmissionError::SidechainRedeclaration("sc".into()),
        ];
        for e in &errors {
            assert!(!format!("{e}").is_empty());
        }
    }

    #[test]
    fn up_version_display() {
        let e = EstimatorError::UpVersion { required: 30000, current: 20100 };
        assert!(e.to_string().contains("30000"));
    }
}

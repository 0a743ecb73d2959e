//! Pool configuration.

use serde::{Deserialize, Serialize};

use harbor_core::amount::FeeRate;

/// Host-supplied knobs for the pool.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MempoolConfig {
    /// Floor for every fee estimate the estimator quotes.
    pub min_relay_fee: FeeRate,
    /// Run the full structural audit after mutating operations. Off by
    /// default: the audit is quadratic in the pool size.
    pub run_expensive_checks: bool,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            min_relay_fee: FeeRate::new(1000),
            run_expensive_checks: false,
        }
    }
}

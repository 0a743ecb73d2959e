//! Monetary amounts and fee rates.
//!
//! All monetary values are in grains (1 HBR = 10^8 grains). Amounts are
//! signed so that fee deltas and balance adjustments can go negative in
//! intermediate arithmetic; `money_in_range` bounds final values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monetary value in grains. Signed per protocol convention.
pub type Amount = i64;

/// One HBR in grains.
pub const COIN: Amount = 100_000_000;

/// Upper bound on any single monetary value.
pub const MAX_MONEY: Amount = 21_000_000 * COIN;

/// Check that an amount lies in `[0, MAX_MONEY]`.
pub fn money_in_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// Fee per 1000 bytes of serialized payload.
///
/// Stored as grains per kilobyte for fine-grained ordering; the division
/// in [`fee_for`](FeeRate::fee_for) truncates, with a one-grain floor for
/// non-empty payloads so that a positive rate never quotes a zero fee.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct FeeRate {
    grains_per_kb: Amount,
}

impl FeeRate {
    /// A zero fee rate.
    pub const ZERO: Self = Self { grains_per_kb: 0 };

    /// Create a fee rate from grains per 1000 bytes.
    pub fn new(grains_per_kb: Amount) -> Self {
        Self { grains_per_kb }
    }

    /// Derive the rate paid by a payload of `size` bytes carrying `fee`.
    ///
    /// Uses i128 intermediates to avoid overflow on large fees.
    pub fn from_fee(fee: Amount, size: usize) -> Self {
        if size == 0 {
            return Self { grains_per_kb: 0 };
        }
        let rate = (fee as i128) * 1000 / (size as i128);
        Self {
            grains_per_kb: rate.clamp(Amount::MIN as i128, Amount::MAX as i128) as Amount,
        }
    }

    /// The rate in grains per kilobyte.
    pub fn per_kb(&self) -> Amount {
        self.grains_per_kb
    }

    /// Fee quoted for a payload of `size` bytes.
    pub fn fee_for(&self, size: usize) -> Amount {
        let fee = (self.grains_per_kb as i128) * (size as i128) / 1000;
        let fee = fee.clamp(Amount::MIN as i128, Amount::MAX as i128) as Amount;
        if fee == 0 && size != 0 && self.grains_per_kb > 0 {
            1
        } else {
            fee
        }
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} grains/kB", self.grains_per_kb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_range_bounds() {
        assert!(money_in_range(0));
        assert!(money_in_range(MAX_MONEY));
        assert!(!money_in_range(-1));
        assert!(!money_in_range(MAX_MONEY + 1));
    }

    #[test]
    fn fee_rate_from_fee() {
        // 500 grains over 250 bytes = 2000 grains/kB.
        assert_eq!(FeeRate::from_fee(500, 250).per_kb(), 2000);
        assert_eq!(FeeRate::from_fee(500, 0).per_kb(), 0);
    }

    #[test]
    fn fee_for_truncates_with_floor() {
        let rate = FeeRate::new(1000);
        assert_eq!(rate.fee_for(250), 250);
        // A positive rate never quotes zero for a non-empty payload.
        let tiny = FeeRate::new(1);
        assert_eq!(tiny.fee_for(100), 1);
        assert_eq!(tiny.fee_for(0), 0);
    }

    #[test]
    fn fee_rate_ordering() {
        assert!(FeeRate::new(1000) > FeeRate::new(999));
        assert_eq!(FeeRate::ZERO, FeeRate::new(0));
    }

    #[test]
    fn fee_rate_large_values_no_overflow() {
        let rate = FeeRate::from_fee(MAX_MONEY, 1);
        assert!(rate.per_kb() > 0);
        let _ = rate.fee_for(usize::MAX >> 16);
    }
}

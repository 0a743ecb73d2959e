//! # harbor-core
//! Foundation types and traits for the Harbor transaction-admission
//! pipeline: amounts, hashes, transaction and certificate payloads,
//! sidechain records, and the chain-view contract.

pub mod amount;
pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

//! Cashback settlement service: receives processor payment events and turns
//! each confirmed payment into exactly one ledger entry plus the matching
//! wallet credits for the purchaser and their referrer.

pub mod models;
pub mod repositories;
pub mod rewards;
pub mod services;
pub mod settings;
pub mod signature;

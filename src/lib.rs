//! Tails a wallet node log and records every transfer it reports in a transaction ledger.

pub mod config;
pub mod ledger;
pub mod txlog;

//! Transaction ledger integration
//!
//! This module provides the durable store the ingest loop writes transaction legs into, and the
//! address directory it consults before mirroring a sent transfer into the recipient's ledger.

/// SQLite-backed ledger store and address directory
pub(crate) mod store;
/// Ledger record and error types
mod types;

pub use store::{AddressDirectory, LedgerStore, SqliteLedgerStore};
pub use types::*;

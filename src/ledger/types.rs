//! Types for the transaction ledger and the address directory

use rust_decimal::Decimal;

/// Opaque wallet address. Equality is exact string match.
pub type Address = String;

/// One ledger leg materialized from a wallet log event.
///
/// `amount` is negative for the outgoing leg of a sent transfer and positive for an
/// incoming leg. `dest` is only set on the outgoing leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// The address whose ledger this leg belongs to.
    pub source: Address,
    /// Destination of an outgoing transfer, absent for inflow legs.
    pub dest: Option<Address>,
    /// Signed amount as written in the wallet log.
    pub amount: Decimal,
    /// Transaction hash, with its trailing separator stripped.
    pub tx_id: String,
    /// Timestamp token copied verbatim from the log line.
    pub timestamp: String,
}

impl TransactionRecord {
    /// Canonical amount text used both for storage and for the idempotency key.
    ///
    /// Trailing zeros are dropped so `5.0` and `5.00` collapse to the same key.
    pub fn amount_key(&self) -> String {
        self.amount.normalize().to_string()
    }

    /// True for the leg that moves funds out of `source`.
    pub fn is_outgoing(&self) -> bool {
        self.amount.is_sign_negative()
    }
}

/// Result of a successful insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was committed.
    Inserted,
    /// A row with the same (tx_id, source, amount) already existed; nothing changed.
    Duplicate,
}

/// A ledger row read back for history queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTransaction {
    pub id: i64,
    pub source: Address,
    pub dest: Option<Address>,
    pub amount: Decimal,
    pub tx_id: String,
    pub timestamp: String,
}

/// Errors raised by a ledger store or address directory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Worth retrying: the store is busy, locked or temporarily unreachable.
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("Store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match error.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen,
            ) => StoreError::Transient(error.to_string()),
            _ => StoreError::Permanent(error.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(error: tokio::task::JoinError) -> Self {
        StoreError::Permanent(format!("Store task failed: {}", error))
    }
}

//!
//! SQLite-backed transaction ledger and address directory.
//!
//! This module defines the two seams the ingest loop talks to: [`LedgerStore`], the durable
//! append target for transaction legs, and [`AddressDirectory`], which answers whether an
//! address belongs to a locally managed wallet. [`SqliteLedgerStore`] implements both on top
//! of a single SQLite connection. All calls are async and push the blocking SQLite work onto
//! Tokio's blocking pool.

use super::types::*;
use rusqlite::{Connection, OptionalExtension, params};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Durable append target for transaction legs.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
	/// Insert one leg and commit it before returning.
	///
	/// A leg whose (tx_id, source, amount) already exists is absorbed and reported as
	/// [`InsertOutcome::Duplicate`].
	async fn insert(&self, record: &TransactionRecord) -> Result<InsertOutcome, StoreError>;
}

/// Lookup of addresses managed by the local wallet service.
#[async_trait::async_trait]
pub trait AddressDirectory: Send + Sync {
	async fn exists(&self, address: &str) -> Result<bool, StoreError>;
}

/// Ledger store and address directory sharing one SQLite database.
#[derive(Clone)]
pub struct SqliteLedgerStore {
	conn: Arc<Mutex<Connection>>,
}

impl SqliteLedgerStore {
	/// Open (or create) the ledger database at `path` and make sure the tables exist.
	///
	/// # Arguments
	/// * `path` - The SQLite database file.
	///
	/// # Returns
	/// A ready store, or a `StoreError` if the file cannot be opened or the schema applied.
	pub fn open(path: &Path) -> Result<Self, StoreError> {
		let conn = Connection::open(path)?;
		conn.busy_timeout(Duration::from_secs(5))?;
		conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
		let store = Self::from_connection(conn)?;
		info!("Opened ledger database {:?}", path);
		Ok(store)
	}

	/// Open a private in-memory ledger.
	pub fn open_in_memory() -> Result<Self, StoreError> {
		Self::from_connection(Connection::open_in_memory()?)
	}

	fn from_connection(conn: Connection) -> Result<Self, StoreError> {
		conn.execute_batch(SCHEMA_SQL)?;
		Ok(Self {
			conn: Arc::new(Mutex::new(conn)),
		})
	}

	/// Run `op` against the connection on the blocking pool.
	async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
	where
		T: Send + 'static,
		F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
	{
		let conn = self.conn.clone();
		tokio::task::spawn_blocking(move || {
			let guard = conn
				.lock()
				.map_err(|_| StoreError::Permanent("Ledger connection poisoned".to_string()))?;
			op(&guard)
		})
		.await?
	}

	/// Fetch the history of `address`, newest first.
	///
	/// Only rows with an id greater than `after_id` are returned, capped at `limit`; the
	/// wallet service pages through history by passing the last id it has seen.
	pub async fn recent_transactions(
		&self,
		address: &str,
		after_id: i64,
		limit: usize,
	) -> Result<Vec<StoredTransaction>, StoreError> {
		let address = address.to_string();
		self.with_conn(move |conn| {
			let mut stmt = conn.prepare(
				"SELECT id, source, dest, amount, hash, date FROM transactions
				 WHERE source = ?1 AND id > ?2 ORDER BY id DESC LIMIT ?3",
			)?;
			let rows = stmt.query_map(params![address, after_id, limit as i64], |row| {
				Ok((
					row.get::<_, i64>(0)?,
					row.get::<_, String>(1)?,
					row.get::<_, Option<String>>(2)?,
					row.get::<_, String>(3)?,
					row.get::<_, String>(4)?,
					row.get::<_, String>(5)?,
				))
			})?;

			let mut history = Vec::new();
			for row in rows {
				let (id, source, dest, amount, tx_id, timestamp) = row?;
				let amount = Decimal::from_str(&amount).map_err(|e| {
					StoreError::Permanent(format!("Stored amount {:?} is not a decimal: {}", amount, e))
				})?;
				history.push(StoredTransaction {
					id,
					source,
					dest,
					amount,
					tx_id,
					timestamp,
				});
			}
			Ok(history)
		})
		.await
	}
}

#[async_trait::async_trait]
impl LedgerStore for SqliteLedgerStore {
	async fn insert(&self, record: &TransactionRecord) -> Result<InsertOutcome, StoreError> {
		let record = record.clone();
		self.with_conn(move |conn| {
			let changed = conn.execute(
				"INSERT INTO transactions (source, dest, amount, hash, date)
				 VALUES (?1, ?2, ?3, ?4, ?5)
				 ON CONFLICT (hash, source, amount) DO NOTHING",
				params![
					record.source,
					record.dest,
					record.amount_key(),
					record.tx_id,
					record.timestamp,
				],
			)?;

			if changed == 0 {
				debug!(
					"Ledger already holds {} {} for {}",
					record.tx_id,
					record.amount_key(),
					record.source
				);
				Ok(InsertOutcome::Duplicate)
			} else {
				Ok(InsertOutcome::Inserted)
			}
		})
		.await
	}
}

#[async_trait::async_trait]
impl AddressDirectory for SqliteLedgerStore {
	async fn exists(&self, address: &str) -> Result<bool, StoreError> {
		let address = address.to_string();
		self.with_conn(move |conn| {
			let found = conn
				.query_row(
					"SELECT 1 FROM addresses WHERE address = ?1",
					params![address],
					|_| Ok(()),
				)
				.optional()?;
			Ok(found.is_some())
		})
		.await
	}
}

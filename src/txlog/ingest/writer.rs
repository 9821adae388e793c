use crate::config::RetryConfig;
use crate::ledger::{AddressDirectory, InsertOutcome, LedgerStore, StoreError, TransactionRecord};

use backoff::future::retry;
use std::sync::Arc;
use tracing::warn;

/// Ledger access for the ingest loop, with transient failures retried.
///
/// Every call runs under the configured exponential backoff. Transient store errors are retried
/// until the elapsed budget runs out, at which point the last error is returned. Permanent errors
/// are returned straight away.
#[derive(Clone)]
pub struct LedgerWriter {
	store: Arc<dyn LedgerStore>,
	directory: Arc<dyn AddressDirectory>,
	retry: RetryConfig,
}

impl LedgerWriter {
	pub fn new(
		store: Arc<dyn LedgerStore>,
		directory: Arc<dyn AddressDirectory>,
		retry: RetryConfig,
	) -> Self {
		Self {
			store,
			directory,
			retry,
		}
	}

	pub async fn insert(&self, record: &TransactionRecord) -> Result<InsertOutcome, StoreError> {
		let store = &self.store;
		retry(self.retry.backoff(), || async move {
			store
				.insert(record)
				.await
				.map_err(|e| classify("insert", &record.tx_id, e))
		})
		.await
	}

	/// Whether `address` is managed by the local wallet service.
	pub async fn is_tracked(&self, address: &str) -> Result<bool, StoreError> {
		let directory = &self.directory;
		retry(self.retry.backoff(), || async move {
			directory
				.exists(address)
				.await
				.map_err(|e| classify("address lookup", address, e))
		})
		.await
	}
}

fn classify(op: &str, subject: &str, e: StoreError) -> backoff::Error<StoreError> {
	if e.is_transient() {
		warn!("Ledger {} for {} failed, retrying: {}", op, subject, e);
		backoff::Error::transient(e)
	} else {
		backoff::Error::permanent(e)
	}
}

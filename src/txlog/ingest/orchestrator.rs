//! Ingest orchestrator tying the log reader to the ledger.
//!
//! This module defines the `IngestOrchestrator`, which owns one tail of the wallet log. It reads
//! lines, folds them into event blocks, writes the resulting legs through the retrying
//! `LedgerWriter` and keeps the read offset checkpoint current.
//!
//! The orchestrator is responsible for:
//! - Restoring the read offset on startup and persisting it at event boundaries
//! - Dropping malformed blocks without stopping the loop
//! - Deciding which store failures are fatal
//! - Polling for new lines until shutdown is signalled
//!
//! The checkpoint only ever names a position between event blocks. A restart therefore never
//! resumes in the middle of a block, and anything re-read after a crash is absorbed by the
//! ledger's duplicate detection.

use crate::config::IngestConfig;
use crate::ledger::{AddressDirectory, InsertOutcome, LedgerStore};
use crate::txlog::ingest::{
    progress_tracker::{IngestProgressTracker, IngestStats},
    state_persistence::StatePersistenceService,
    writer::LedgerWriter,
};
use crate::txlog::{
    EventFields, IngestError, LogReader, MalformedEventError, ParseOutcome, RecordParser,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Main ingest loop over one wallet log.
pub struct IngestOrchestrator {
    reader: LogReader,
    parser: RecordParser,
    writer: LedgerWriter,
    persistence: StatePersistenceService,
    progress: IngestProgressTracker,

    // Configuration
    poll_interval: Duration,
    follow: bool,

    /// Offset of the last event boundary reached
    checkpoint: u64,
    /// Offset last written to the checkpoint file
    saved: u64,
}

impl IngestOrchestrator {
    /// Restore the saved offset and open the log there.
    pub async fn new(
        config: &IngestConfig,
        store: Arc<dyn LedgerStore>,
        directory: Arc<dyn AddressDirectory>,
    ) -> Result<Self, IngestError> {
        let persistence = StatePersistenceService::new(config.state_dir.clone(), &config.log_path);
        let restored = persistence.restore_offset().await?;
        let reader = LogReader::open(&config.log_path, restored).await?;
        let start = reader.offset();

        Ok(Self {
            reader,
            parser: RecordParser::default(),
            writer: LedgerWriter::new(store, directory, config.retry.clone()),
            persistence,
            progress: IngestProgressTracker::new(start, config.progress_interval),
            poll_interval: config.poll_interval,
            follow: config.follow,
            checkpoint: start,
            saved: restored,
        })
    }

    /// Tail the log until `shutdown` flips to true, or until the first end of file when not
    /// following.
    ///
    /// Returns an error only when the log cannot be read, the checkpoint cannot be written or
    /// the ledger stays unavailable past the retry budget.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<IngestStats, IngestError> {
        info!(
            "Ingesting {:?} from offset {}",
            self.reader.path(),
            self.reader.offset()
        );

        let result = self.ingest(&mut shutdown).await;

        if let Err(e) = self.persist_checkpoint().await {
            error!("Failed to save offset on exit: {}", e);
            if result.is_ok() {
                return Err(e);
            }
        }
        self.progress.log_progress(true);

        result.map(|_| self.progress.get_stats())
    }

    async fn ingest(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), IngestError> {
        let mut position = self.reader.offset();

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested at offset {}", self.checkpoint);
                return Ok(());
            }

            if let Some(line) = self.reader.next_line().await? {
                position = self.reader.offset();
                self.progress.record_line(position);
                self.process_line(&line).await?;
                self.progress.log_progress(false);
                continue;
            }

            if self.reader.offset() < position {
                self.restart_from_top();
                position = self.reader.offset();
            }

            self.persist_checkpoint().await?;

            if !self.follow {
                if let Err(e) = self.parser.finish() {
                    self.record_malformed(&e);
                }
                debug!("Reached end of {:?}", self.reader.path());
                return Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed at offset {}", self.checkpoint);
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Feed one line to the parser and write the event it completes, if any.
    async fn process_line(&mut self, line: &str) -> Result<(), IngestError> {
        match self.parser.feed(line) {
            Ok(ParseOutcome::Ignored) | Ok(ParseOutcome::Pending) => {}
            Ok(ParseOutcome::Complete(fields)) => {
                self.handle_event(fields).await?;
                self.checkpoint = self.reader.offset();
                self.persist_checkpoint().await?;
                return Ok(());
            }
            Err(e) => self.record_malformed(&e),
        }

        if self.parser.is_idle() {
            self.checkpoint = self.reader.offset();
        }
        Ok(())
    }

    /// Write every leg of one event, in order.
    async fn handle_event(&mut self, fields: EventFields) -> Result<(), IngestError> {
        debug!("Recognized {} event {}", fields.kind, fields.tx_id);
        self.progress.record_event(fields.kind);

        let dest_tracked = match fields.mirror_candidate() {
            Some(dest) => match self.writer.is_tracked(dest).await {
                Ok(tracked) => tracked,
                Err(e) if e.is_transient() => {
                    error!("Address directory unavailable looking up {}: {}", dest, e);
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(
                        "Address lookup for {} failed, not mirroring {}: {}",
                        dest, fields.tx_id, e
                    );
                    false
                }
            },
            None => false,
        };

        for record in fields.into_records(dest_tracked) {
            match self.writer.insert(&record).await {
                Ok(outcome) => {
                    match outcome {
                        InsertOutcome::Inserted => info!(
                            "Recorded {} {} {} for {}",
                            if record.is_outgoing() { "sent" } else { "received" },
                            record.tx_id,
                            record.amount_key(),
                            record.source
                        ),
                        InsertOutcome::Duplicate => debug!(
                            "Skipped duplicate {} {} for {}",
                            record.tx_id,
                            record.amount_key(),
                            record.source
                        ),
                    }
                    self.progress.record_insert(outcome);
                }
                Err(e) if e.is_transient() => {
                    error!("Ledger unavailable writing {}: {}", record.tx_id, e);
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(
                        "Ledger rejected {} {} for {}: {}",
                        record.tx_id,
                        record.amount_key(),
                        record.source,
                        e
                    );
                    self.progress.record_rejected();
                }
            }
        }
        Ok(())
    }

    fn record_malformed(&mut self, e: &MalformedEventError) {
        warn!(
            "Dropping malformed {} event ({} lines, {} tokens): {}",
            e.kind(),
            e.partial().line_count(),
            e.partial().len(),
            e
        );
        self.progress.record_malformed();
    }

    /// The log was truncated under us and the reader went back to the beginning.
    fn restart_from_top(&mut self) {
        if let Err(e) = self.parser.finish() {
            self.record_malformed(&e);
        }
        self.checkpoint = self.reader.offset();
        self.progress.record_reset(self.checkpoint);
    }

    async fn persist_checkpoint(&mut self) -> Result<(), IngestError> {
        if self.checkpoint == self.saved {
            return Ok(());
        }
        self.persistence.save_offset(self.checkpoint).await?;
        self.saved = self.checkpoint;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::ledger::store::tests::{row_count, track};
    use crate::ledger::{SqliteLedgerStore, StoreError, StoredTransaction, TransactionRecord};
    use crate::txlog::test_fixtures::{as_log, noise_line, received_block, sent_block};
    use rust_decimal::Decimal;
    use std::io::Write;
    use std::path::Path;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> IngestConfig {
        IngestConfig {
            log_path: dir.path().join("tx.log"),
            database_path: dir.path().join("tx_history.db"),
            state_dir: dir.path().join("state"),
            poll_interval: Duration::from_millis(5),
            follow: false,
            retry: RetryConfig {
                initial_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(5),
                max_elapsed: Duration::from_millis(50),
            },
            progress_interval: 1000,
        }
    }

    fn append(path: &Path, lines: &[String]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(as_log(lines).as_bytes()).unwrap();
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn ingest_with(
        config: &IngestConfig,
        store: Arc<dyn LedgerStore>,
        directory: Arc<dyn AddressDirectory>,
    ) -> Result<IngestStats, IngestError> {
        let (_tx, rx) = watch::channel(false);
        IngestOrchestrator::new(config, store, directory)
            .await?
            .run(rx)
            .await
    }

    async fn ingest(config: &IngestConfig, store: &SqliteLedgerStore) -> IngestStats {
        let store = Arc::new(store.clone());
        ingest_with(config, store.clone(), store).await.unwrap()
    }

    async fn history(store: &SqliteLedgerStore, address: &str) -> Vec<StoredTransaction> {
        store.recent_transactions(address, 0, 15).await.unwrap()
    }

    async fn saved_offset(config: &IngestConfig) -> u64 {
        StatePersistenceService::new(config.state_dir.clone(), &config.log_path)
            .restore_offset()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_received_event_writes_one_leg() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let mut lines = vec![noise_line("t0")];
        lines.extend(received_block("2024-01-01T00:00:00", "abc123", "5.0", "addrX"));
        append(&config.log_path, &lines);

        let stats = ingest(&config, &store).await;

        let rows = history(&store, "addrX").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dest, None);
        assert_eq!(rows[0].amount, dec("5"));
        assert_eq!(rows[0].tx_id, "abc123");
        assert_eq!(rows[0].timestamp, "2024-01-01T00:00:00");
        assert_eq!(stats.received_events, 1);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.lines_read, 3);
    }

    #[tokio::test]
    async fn test_sent_to_untracked_address_writes_outflow_only() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        append(
            &config.log_path,
            &sent_block("2024-01-02T10:30:00", "def456", "3.5", "addrB", "addrA"),
        );

        ingest(&config, &store).await;

        assert_eq!(row_count(&store), 1);
        let rows = history(&store, "addrA").await;
        assert_eq!(rows[0].dest.as_deref(), Some("addrB"));
        assert_eq!(rows[0].amount, dec("-3.5"));
        assert!(history(&store, "addrB").await.is_empty());
    }

    #[tokio::test]
    async fn test_sent_to_tracked_address_writes_both_legs() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        track(&store, "addrB");
        append(
            &config.log_path,
            &sent_block("2024-01-02T10:30:00", "def456", "3.5", "addrB", "addrA"),
        );

        let stats = ingest(&config, &store).await;

        assert_eq!(stats.inserted, 2);
        let outflow = history(&store, "addrA").await;
        let inflow = history(&store, "addrB").await;
        assert_eq!(outflow.len(), 1);
        assert_eq!(inflow.len(), 1);
        assert_eq!(inflow[0].dest, None);
        assert_eq!(outflow[0].tx_id, inflow[0].tx_id);
        assert_eq!(outflow[0].amount + inflow[0].amount, Decimal::ZERO);
        assert!(outflow[0].id < inflow[0].id);
    }

    #[tokio::test]
    async fn test_reingest_from_start_adds_nothing() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        track(&store, "addrB");
        let mut lines = received_block("t1", "aaa", "1.0", "addrX");
        lines.extend(sent_block("t2", "bbb", "2.0", "addrB", "addrA"));
        append(&config.log_path, &lines);

        ingest(&config, &store).await;
        assert_eq!(row_count(&store), 3);

        std::fs::remove_dir_all(&config.state_dir).unwrap();
        let stats = ingest(&config, &store).await;

        assert_eq!(row_count(&store), 3);
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.duplicates, 3);
    }

    #[tokio::test]
    async fn test_truncated_blocks_are_dropped() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let sent = sent_block("t1", "bbb", "2.0", "addrB", "addrA");
        let mut lines = vec![sent[0].clone()];
        lines.extend(received_block("t2", "ccc", "3.0", "addrY"));
        lines.push(sent[0].clone());
        append(&config.log_path, &lines);

        let stats = ingest(&config, &store).await;

        assert_eq!(row_count(&store), 1);
        assert_eq!(history(&store, "addrY").await[0].tx_id, "ccc");
        assert_eq!(stats.malformed, 2);
    }

    #[tokio::test]
    async fn test_checkpoint_stops_before_unfinished_block() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let complete = received_block("t1", "aaa", "1.0", "addrX");
        let sent = sent_block("t2", "bbb", "2.0", "addrB", "addrA");
        append(&config.log_path, &complete);
        append(&config.log_path, &sent[..2]);

        ingest(&config, &store).await;

        assert_eq!(saved_offset(&config).await, as_log(&complete).len() as u64);

        append(&config.log_path, &sent[2..]);
        let stats = ingest(&config, &store).await;

        assert_eq!(stats.sent_events, 1);
        assert_eq!(stats.malformed, 0);
        assert_eq!(history(&store, "addrA").await.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_resumes_from_saved_offset() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let first = received_block("t1", "aaa", "1.0", "addrX");
        append(&config.log_path, &first);

        ingest(&config, &store).await;

        let second = received_block("t2", "bbb", "2.0", "addrX");
        append(&config.log_path, &second);
        let stats = ingest(&config, &store).await;

        assert_eq!(stats.start_offset, as_log(&first).len() as u64);
        assert_eq!(stats.lines_read, 2);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.duplicates, 0);
        assert_eq!(history(&store, "addrX").await.len(), 2);
    }

    #[tokio::test]
    async fn test_follow_mode_picks_up_appended_lines_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = IngestConfig {
            follow: true,
            ..config(&dir)
        };
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let block = received_block("t1", "aaa", "1.0", "addrX");
        append(&config.log_path, &block[..1]);

        let shared = Arc::new(store.clone());
        let (tx, rx) = watch::channel(false);
        let orchestrator = IngestOrchestrator::new(&config, shared.clone(), shared)
            .await
            .unwrap();

        let driver = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            append(&config.log_path, &block[1..]);
            for _ in 0..200 {
                if row_count(&store) == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tx.send(true).unwrap();
        };

        let (stats, _) = tokio::join!(orchestrator.run(rx), driver);
        let stats = stats.unwrap();

        assert_eq!(row_count(&store), 1);
        assert_eq!(stats.received_events, 1);
        assert_eq!(saved_offset(&config).await, as_log(&block).len() as u64);
    }

    #[tokio::test]
    async fn test_shutdown_mid_block_keeps_offset_at_block_start() {
        let dir = TempDir::new().unwrap();
        let config = IngestConfig {
            follow: true,
            ..config(&dir)
        };
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let first = received_block("t1", "aaa", "1.0", "addrX");
        let sent = sent_block("t2", "bbb", "2.0", "addrB", "addrA");
        append(&config.log_path, &first);
        append(&config.log_path, &sent[..2]);

        let shared = Arc::new(store.clone());
        let (tx, rx) = watch::channel(false);
        let orchestrator = IngestOrchestrator::new(&config, shared.clone(), shared)
            .await
            .unwrap();

        let driver = async {
            for _ in 0..200 {
                if row_count(&store) == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            // Let the loop reach end of file with the sent block still pending.
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.send(true).unwrap();
        };

        let (stats, _) = tokio::join!(orchestrator.run(rx), driver);
        let stats = stats.unwrap();

        assert_eq!(stats.malformed, 0);
        assert_eq!(stats.sent_events, 0);
        assert_eq!(stats.lines_read, 4);
        assert_eq!(row_count(&store), 1);
        assert_eq!(saved_offset(&config).await, as_log(&first).len() as u64);

        append(&config.log_path, &sent[2..]);
        let resumed = ingest(&IngestConfig { follow: false, ..config.clone() }, &store).await;

        assert_eq!(resumed.sent_events, 1);
        assert_eq!(resumed.malformed, 0);
        assert_eq!(history(&store, "addrA").await.len(), 1);
    }

    #[tokio::test]
    async fn test_truncated_log_is_read_again_from_start() {
        let dir = TempDir::new().unwrap();
        let config = IngestConfig {
            follow: true,
            ..config(&dir)
        };
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let mut lines = received_block("t1", "aaa", "1.0", "addrX");
        lines.extend(received_block("t2", "bbb", "2.0", "addrX"));
        append(&config.log_path, &lines);

        let shared = Arc::new(store.clone());
        let (tx, rx) = watch::channel(false);
        let orchestrator = IngestOrchestrator::new(&config, shared.clone(), shared)
            .await
            .unwrap();

        let driver = async {
            for _ in 0..200 {
                if row_count(&store) == 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            std::fs::write(
                &config.log_path,
                as_log(&received_block("t3", "ccc", "3.0", "addrY")),
            )
            .unwrap();
            for _ in 0..200 {
                if row_count(&store) == 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tx.send(true).unwrap();
        };

        let (stats, _) = tokio::join!(orchestrator.run(rx), driver);

        assert_eq!(stats.unwrap().inserted, 3);
        assert_eq!(history(&store, "addrY").await.len(), 1);
    }

    /// Store whose every call fails with the same error.
    struct FailingStore(StoreError);

    #[async_trait::async_trait]
    impl LedgerStore for FailingStore {
        async fn insert(&self, _record: &TransactionRecord) -> Result<InsertOutcome, StoreError> {
            Err(self.0.clone())
        }
    }

    #[async_trait::async_trait]
    impl AddressDirectory for FailingStore {
        async fn exists(&self, _address: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_permanent_store_errors_skip_the_record() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let mut lines = received_block("t1", "aaa", "1.0", "addrX");
        lines.extend(sent_block("t2", "bbb", "2.0", "addrB", "addrA"));
        append(&config.log_path, &lines);
        let store = Arc::new(FailingStore(StoreError::Permanent("CHECK failed".to_string())));

        let stats = ingest_with(&config, store.clone(), store).await.unwrap();

        assert_eq!(stats.events(), 2);
        assert_eq!(stats.rejected, 2);
        assert_eq!(saved_offset(&config).await, as_log(&lines).len() as u64);
    }

    #[tokio::test]
    async fn test_unavailable_store_stops_before_the_event() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let mut lines = vec![noise_line("t0")];
        lines.extend(received_block("t1", "aaa", "1.0", "addrX"));
        append(&config.log_path, &lines);
        let store = Arc::new(FailingStore(StoreError::Transient("database is locked".to_string())));

        let err = ingest_with(&config, store.clone(), store).await.unwrap_err();

        assert!(matches!(err, IngestError::StoreError(StoreError::Transient(_))));
        assert_eq!(
            saved_offset(&config).await,
            as_log(&lines[..1]).len() as u64
        );
    }

    #[tokio::test]
    async fn test_missing_log_fails_to_start() {
        let dir = TempDir::new().unwrap();
        let config = IngestConfig {
            log_path: dir.path().join("missing.log"),
            ..config(&dir)
        };
        let store = Arc::new(SqliteLedgerStore::open_in_memory().unwrap());

        let err = ingest_with(&config, store.clone(), store).await.unwrap_err();

        assert!(matches!(err, IngestError::LogOpen { .. }));
    }
}

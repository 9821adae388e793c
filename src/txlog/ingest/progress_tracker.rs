//! Progress tracking for log ingestion.
//!
//! The `IngestProgressTracker` counts lines read, events recognized and ledger writes, and logs a
//! progress line every `interval` lines so a long catch-up over an old log stays observable.

use crate::ledger::InsertOutcome;
use crate::txlog::types::EventKind;

use tracing::info;

/// Counters for one ingest session.
#[derive(Debug, Clone)]
pub struct IngestProgressTracker {
    /// Offset the session started from
    start_offset: u64,
    /// Offset just past the last line read
    offset: u64,
    lines_read: u64,
    received_events: u64,
    sent_events: u64,
    /// Legs committed as new rows
    inserted: u64,
    /// Legs the ledger already held
    duplicates: u64,
    /// Blocks dropped as malformed
    malformed: u64,
    /// Legs the ledger refused permanently
    rejected: u64,
    /// Log every N lines
    interval: u64,
    last_logged_lines: u64,
}

impl IngestProgressTracker {
    pub fn new(start_offset: u64, interval: u64) -> Self {
        Self {
            start_offset,
            offset: start_offset,
            lines_read: 0,
            received_events: 0,
            sent_events: 0,
            inserted: 0,
            duplicates: 0,
            malformed: 0,
            rejected: 0,
            interval: interval.max(1),
            last_logged_lines: 0,
        }
    }

    pub fn record_line(&mut self, offset: u64) {
        self.lines_read += 1;
        self.offset = offset;
    }

    /// The reader started over at the beginning of a truncated log.
    pub fn record_reset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn record_event(&mut self, kind: EventKind) {
        match kind {
            EventKind::Received => self.received_events += 1,
            EventKind::Sent => self.sent_events += 1,
        }
    }

    pub fn record_insert(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.inserted += 1,
            InsertOutcome::Duplicate => self.duplicates += 1,
        }
    }

    pub fn record_malformed(&mut self) {
        self.malformed += 1;
    }

    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    /// Log progress at regular intervals or when forced
    pub fn log_progress(&mut self, force: bool) {
        let lines_since_last_log = self.lines_read.saturating_sub(self.last_logged_lines);
        let should_log = force || lines_since_last_log >= self.interval;

        if should_log && self.lines_read > 0 {
            info!(
                "Ingest progress: {} lines, {} received / {} sent events, {} legs written ({} duplicates) up to offset {}",
                self.lines_read,
                self.received_events,
                self.sent_events,
                self.inserted,
                self.duplicates,
                self.offset
            );
            self.last_logged_lines = self.lines_read;
        }
    }

    pub fn get_stats(&self) -> IngestStats {
        IngestStats {
            start_offset: self.start_offset,
            offset: self.offset,
            lines_read: self.lines_read,
            received_events: self.received_events,
            sent_events: self.sent_events,
            inserted: self.inserted,
            duplicates: self.duplicates,
            malformed: self.malformed,
            rejected: self.rejected,
        }
    }
}

/// Statistics about an ingest session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub start_offset: u64,
    pub offset: u64,
    pub lines_read: u64,
    pub received_events: u64,
    pub sent_events: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub rejected: u64,
}

impl IngestStats {
    pub fn events(&self) -> u64 {
        self.received_events + self.sent_events
    }

    /// Get a human-readable summary of the ingest statistics
    pub fn summary(&self) -> String {
        let mut skipped = Vec::new();
        if self.malformed > 0 {
            skipped.push(format!("{} malformed", self.malformed));
        }
        if self.rejected > 0 {
            skipped.push(format!("{} rejected", self.rejected));
        }

        format!(
            "Ingested offset {} to {}: {} lines, {} events, {} legs written, {} duplicates{}",
            self.start_offset,
            self.offset,
            self.lines_read,
            self.events(),
            self.inserted,
            self.duplicates,
            if skipped.is_empty() {
                String::new()
            } else {
                format!(" ({})", skipped.join(", "))
            }
        )
    }
}

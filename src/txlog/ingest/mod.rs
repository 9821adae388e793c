//! Log ingest loop
//!
//! This module runs the long-lived tail of the wallet log and keeps the ledger in step with it.
//! It is composed of several submodules, each responsible for one aspect of ingestion:
//!
//! - `orchestrator`: The main loop. It wires together the reader, parser, writer and persistence.
//! - `writer`: Ledger access with bounded exponential backoff for transient failures.
//! - `progress_tracker`: Counts lines, events and writes, and logs periodic progress.
//! - `repositories`: Storage of the read offset checkpoint.
//! - `state_persistence`: Saves and restores the read offset through a repository.

/// Main coordinator for the ingest loop
pub mod orchestrator;
/// Tracks ingest progress and statistics
pub mod progress_tracker;
/// Offset checkpoint storage
pub mod repositories;
/// Read offset save and restore
pub mod state_persistence;
/// Retrying ledger writer
pub mod writer;

pub use orchestrator::*;
pub use progress_tracker::IngestStats;

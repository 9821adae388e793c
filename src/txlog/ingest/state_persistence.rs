//! Read offset persistence for the ingest loop.
//!
//! The `StatePersistenceService` saves and restores the byte offset of the last fully processed
//! event block, so a restarted tailer skips what it already wrote. The details of where the
//! checkpoint lives are hidden behind the `OffsetRepository` trait.

use crate::txlog::ingest::repositories::{FileOffsetRepository, OffsetRepository};
use crate::txlog::types::IngestError;

use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Service for managing the read offset of one log file.
pub struct StatePersistenceService {
    log_path: PathBuf,
    offset_repo: Box<dyn OffsetRepository + Send + Sync>,
}

impl StatePersistenceService {
    /// Create a persistence service keeping its checkpoint in `state_dir`.
    pub fn new(state_dir: PathBuf, log_path: &Path) -> Self {
        Self::with_repository(
            log_path,
            Box::new(FileOffsetRepository::new(state_dir, log_path)),
        )
    }

    pub fn with_repository(
        log_path: &Path,
        offset_repo: Box<dyn OffsetRepository + Send + Sync>,
    ) -> Self {
        Self {
            log_path: log_path.to_path_buf(),
            offset_repo,
        }
    }

    /// Record that every event before `offset` has been written to the ledger.
    pub async fn save_offset(&self, offset: u64) -> Result<(), IngestError> {
        self.offset_repo.save(&self.log_path, offset).await
    }

    /// Offset to resume from, or 0 when there is no usable checkpoint.
    ///
    /// A checkpoint recorded for a different log path is ignored.
    pub async fn restore_offset(&self) -> Result<u64, IngestError> {
        match self.offset_repo.load().await? {
            Some(checkpoint) if checkpoint.log_path == self.log_path => {
                info!(
                    "Restored offset {} for {:?} (saved {})",
                    checkpoint.offset, self.log_path, checkpoint.timestamp
                );
                Ok(checkpoint.offset)
            }
            Some(checkpoint) => {
                warn!(
                    "Offset checkpoint belongs to {:?}, not {:?}; starting from the beginning",
                    checkpoint.log_path, self.log_path
                );
                Ok(0)
            }
            None => Ok(0),
        }
    }
}

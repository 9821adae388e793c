use crate::txlog::types::IngestError;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Last event boundary reached in a log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetCheckpoint {
	pub log_path: PathBuf,
	pub offset: u64,
	/// RFC 3339 time the checkpoint was written.
	pub timestamp: String,
}

/// Repository for read offset persistence
#[async_trait::async_trait]
pub trait OffsetRepository {
	async fn save(&self, log_path: &Path, offset: u64) -> Result<(), IngestError>;
	async fn load(&self) -> Result<Option<OffsetCheckpoint>, IngestError>;
}

/// File-based implementation of OffsetRepository
///
/// One JSON file per log, named after the log file and kept in the state directory.
pub struct FileOffsetRepository {
	state_dir: PathBuf,
	filename: PathBuf,
}

impl FileOffsetRepository {
	pub fn new(state_dir: PathBuf, log_path: &Path) -> Self {
		let log_name = log_path
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_else(|| "log".to_string());
		let filename = state_dir.join(format!("{}.offset.json", log_name));
		Self {
			state_dir,
			filename,
		}
	}

	pub fn filename(&self) -> &Path {
		&self.filename
	}

	fn temp_filename(&self) -> PathBuf {
		self.filename.with_extension("json.tmp")
	}
}

#[async_trait::async_trait]
impl OffsetRepository for FileOffsetRepository {
	async fn save(&self, log_path: &Path, offset: u64) -> Result<(), IngestError> {
		let checkpoint = OffsetCheckpoint {
			log_path: log_path.to_path_buf(),
			offset,
			timestamp: chrono::Utc::now().to_rfc3339(),
		};
		let content = serde_json::to_vec_pretty(&checkpoint).map_err(|e| {
			IngestError::PersistenceError(format!("Failed to serialize offset checkpoint: {}", e))
		})?;

		tokio::fs::create_dir_all(&self.state_dir)
			.await
			.map_err(|e| {
				IngestError::PersistenceError(format!(
					"Failed to create state directory {:?}: {}",
					self.state_dir, e
				))
			})?;

		// Write aside and rename so a crash never leaves a half-written checkpoint.
		let temp = self.temp_filename();
		let write = async {
			let mut file = tokio::fs::File::create(&temp).await?;
			file.write_all(&content).await?;
			file.sync_all().await?;
			tokio::fs::rename(&temp, &self.filename).await
		};
		write.await.map_err(|e| {
			IngestError::PersistenceError(format!(
				"Failed to write offset checkpoint {:?}: {}",
				self.filename, e
			))
		})?;

		debug!("Saved offset {} for {:?}", offset, log_path);
		Ok(())
	}

	async fn load(&self) -> Result<Option<OffsetCheckpoint>, IngestError> {
		let content = match tokio::fs::read(&self.filename).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => {
				return Err(IngestError::PersistenceError(format!(
					"Failed to read offset checkpoint {:?}: {}",
					self.filename, e
				)));
			}
		};

		match serde_json::from_slice::<OffsetCheckpoint>(&content) {
			Ok(checkpoint) => Ok(Some(checkpoint)),
			Err(e) => {
				// Replaying from the start is safe: inserts are idempotent.
				warn!(
					"Ignoring unreadable offset checkpoint {:?}: {}",
					self.filename, e
				);
				Ok(None)
			}
		}
	}
}

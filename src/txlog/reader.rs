use crate::txlog::types::IngestError;

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, warn};

/// Line reader over a growing log file.
///
/// Tracks the byte offset just past the last complete line handed out, so a restart can
/// resume exactly there. A trailing line without its `\n` is left unread until the writer
/// finishes it.
pub struct LogReader {
	path: PathBuf,
	reader: BufReader<File>,
	offset: u64,
	buf: Vec<u8>,
}

impl LogReader {
	/// Open `path` positioned at `start_offset`.
	///
	/// An offset past the end of the file means the log was replaced since it was recorded,
	/// so reading starts over from the beginning.
	pub async fn open(path: &Path, start_offset: u64) -> Result<Self, IngestError> {
		let file = open_log(path).await?;
		let len = file.metadata().await?.len();
		let offset = if start_offset > len {
			warn!(
				"Log {:?} is {} bytes, shorter than saved offset {}; reading from the start",
				path, len, start_offset
			);
			0
		} else {
			start_offset
		};

		let mut reader = BufReader::new(file);
		reader.seek(SeekFrom::Start(offset)).await?;
		debug!("Reading {:?} from offset {}", path, offset);

		Ok(Self {
			path: path.to_path_buf(),
			reader,
			offset,
			buf: Vec::new(),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Byte offset just past the last complete line returned.
	pub fn offset(&self) -> u64 {
		self.offset
	}

	/// Next complete line without its line terminator, or `None` at the current end of file.
	///
	/// Invalid UTF-8 is replaced rather than rejected. At end of file the log is checked for
	/// truncation; a log now shorter than the offset is reopened from the start.
	pub async fn next_line(&mut self) -> Result<Option<String>, IngestError> {
		self.buf.clear();
		let read = self.reader.read_until(b'\n', &mut self.buf).await?;

		if read > 0 && self.buf.last() == Some(&b'\n') {
			self.offset += read as u64;
			let mut end = self.buf.len() - 1;
			if end > 0 && self.buf[end - 1] == b'\r' {
				end -= 1;
			}
			return Ok(Some(String::from_utf8_lossy(&self.buf[..end]).into_owned()));
		}

		if read > 0 {
			// Unterminated tail; pick it up again once the newline lands.
			self.reader.seek(SeekFrom::Start(self.offset)).await?;
		}
		self.check_truncation().await?;
		Ok(None)
	}

	async fn check_truncation(&mut self) -> Result<(), IngestError> {
		let len = match tokio::fs::metadata(&self.path).await {
			Ok(meta) => meta.len(),
			// Rotated away and not recreated yet; keep the old handle.
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(e.into()),
		};

		if len < self.offset {
			warn!(
				"Log {:?} shrank from offset {} to {} bytes; reopening from the start",
				self.path, self.offset, len
			);
			self.reader = BufReader::new(open_log(&self.path).await?);
			self.offset = 0;
		}
		Ok(())
	}
}

async fn open_log(path: &Path) -> Result<File, IngestError> {
	File::open(path).await.map_err(|source| IngestError::LogOpen {
		path: path.to_path_buf(),
		source,
	})
}

use crate::ledger::StoreError;

use std::fmt;
use std::path::PathBuf;

/// The two wallet log events this service understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	/// "New transaction received": one trigger line plus one continuation line.
	Received,
	/// "created and send": one trigger line plus two continuation lines.
	Sent,
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EventKind::Received => f.write_str("received"),
			EventKind::Sent => f.write_str("sent"),
		}
	}
}

/// Fields extracted from an event block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
	Source,
	Dest,
	Amount,
	TxId,
	Timestamp,
}

impl fmt::Display for Field {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Field::Source => "source",
			Field::Dest => "dest",
			Field::Amount => "amount",
			Field::TxId => "tx_id",
			Field::Timestamp => "timestamp",
		};
		f.write_str(name)
	}
}

/// Whitespace tokens of every line in one event block, in the order the lines were read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
	tokens: Vec<String>,
	lines: usize,
}

impl RawEvent {
	/// Start a block from its trigger line.
	pub fn from_line(line: &str) -> Self {
		let mut event = Self::default();
		event.push_line(line);
		event
	}

	/// Append a continuation line's tokens after the ones already collected.
	pub fn push_line(&mut self, line: &str) {
		self.tokens
			.extend(line.split_whitespace().map(str::to_string));
		self.lines += 1;
	}

	pub fn token(&self, index: usize) -> Option<&str> {
		self.tokens.get(index).map(String::as_str)
	}

	pub fn tokens(&self) -> &[String] {
		&self.tokens
	}

	pub fn len(&self) -> usize {
		self.tokens.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tokens.is_empty()
	}

	/// Number of log lines folded into this block.
	pub fn line_count(&self) -> usize {
		self.lines
	}
}

/// A recognized event block that cannot be turned into ledger records.
///
/// Always recoverable: the ingest loop logs it, drops the block and carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedEventError {
	#[error("{kind} event truncated: expected {expected} continuation lines, got {received}")]
	Truncated {
		kind: EventKind,
		expected: usize,
		received: usize,
		partial: RawEvent,
	},

	#[error("{kind} event has {available} tokens but {field} is read from token {index}")]
	MissingToken {
		kind: EventKind,
		field: Field,
		index: usize,
		available: usize,
		partial: RawEvent,
	},

	#[error("{kind} event has invalid {field} {value:?}")]
	InvalidField {
		kind: EventKind,
		field: Field,
		value: String,
		partial: RawEvent,
	},
}

impl MalformedEventError {
	pub fn kind(&self) -> EventKind {
		match self {
			MalformedEventError::Truncated { kind, .. }
			| MalformedEventError::MissingToken { kind, .. }
			| MalformedEventError::InvalidField { kind, .. } => *kind,
		}
	}

	/// The tokens collected before the block was abandoned.
	pub fn partial(&self) -> &RawEvent {
		match self {
			MalformedEventError::Truncated { partial, .. }
			| MalformedEventError::MissingToken { partial, .. }
			| MalformedEventError::InvalidField { partial, .. } => partial,
		}
	}
}

/// Errors that stop the ingest loop
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
	#[error("Failed to open log file {path:?}: {source}")]
	LogOpen {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Ledger store error: {0}")]
	StoreError(#[from] StoreError),

	#[error("State persistence error: {0}")]
	PersistenceError(String),
}

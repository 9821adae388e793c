use crate::txlog::grammar::{EventFields, EventGrammar, LogGrammar};
use crate::txlog::types::{EventKind, MalformedEventError, RawEvent};
use tracing::debug;

/// Where the parser is inside the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserState {
	/// Scanning for a trigger line.
	Idle,
	/// A trigger line was seen and `owed` continuation lines are still expected.
	AwaitingTail {
		grammar: EventGrammar,
		owed: usize,
		raw: RawEvent,
	},
}

/// What feeding one line produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
	/// The line is not part of any event.
	Ignored,
	/// The line started or extended a block that is not complete yet.
	Pending,
	/// The line completed a block.
	Complete(EventFields),
}

/// State machine that folds wallet log lines into event blocks.
///
/// Lines are fed one at a time. A trigger line seeds a [`RawEvent`]; the following lines are
/// appended until the block has all its continuation lines, at which point its fields are
/// extracted and the parser returns to [`ParserState::Idle`].
#[derive(Debug, Clone)]
pub struct RecordParser {
	grammar: LogGrammar,
	state: ParserState,
}

impl Default for RecordParser {
	fn default() -> Self {
		Self::new(LogGrammar::default())
	}
}

impl RecordParser {
	pub fn new(grammar: LogGrammar) -> Self {
		Self {
			grammar,
			state: ParserState::Idle,
		}
	}

	pub fn state(&self) -> &ParserState {
		&self.state
	}

	/// True between blocks. Only then is the reader position a safe restart point.
	pub fn is_idle(&self) -> bool {
		matches!(self.state, ParserState::Idle)
	}

	/// Consume one log line.
	///
	/// Continuation lines are otherwise taken by position without looking at their content, with
	/// one exception: a trigger line arriving while a block is still owed continuation lines
	/// abandons that block instead of being folded into it. The abandoned block is returned as
	/// [`MalformedEventError::Truncated`] and the new trigger line starts a fresh block. Any
	/// error leaves the parser ready for the next line.
	pub fn feed(&mut self, line: &str) -> Result<ParseOutcome, MalformedEventError> {
		match std::mem::replace(&mut self.state, ParserState::Idle) {
			ParserState::Idle => match self.grammar.classify(line) {
				Some(grammar) => {
					let grammar = *grammar;
					Ok(self.start(grammar, line))
				}
				None => Ok(ParseOutcome::Ignored),
			},
			ParserState::AwaitingTail {
				grammar,
				owed,
				mut raw,
			} => {
				if let Some(next) = self.grammar.classify(line) {
					let next = *next;
					debug!(
						"New {} trigger while {} block still owes {} lines",
						next.kind, grammar.kind, owed
					);
					self.start(next, line);
					return Err(truncated(&grammar, owed, raw));
				}

				raw.push_line(line);
				let owed = owed.saturating_sub(1);
				if owed == 0 {
					grammar.extract(&raw).map(ParseOutcome::Complete)
				} else {
					self.state = ParserState::AwaitingTail { grammar, owed, raw };
					Ok(ParseOutcome::Pending)
				}
			}
		}
	}

	/// Signal that no more lines will arrive.
	///
	/// A block still waiting for continuation lines is returned as truncated and dropped.
	pub fn finish(&mut self) -> Result<(), MalformedEventError> {
		match std::mem::replace(&mut self.state, ParserState::Idle) {
			ParserState::Idle => Ok(()),
			ParserState::AwaitingTail { grammar, owed, raw } => Err(truncated(&grammar, owed, raw)),
		}
	}

	/// Kind and outstanding line count of the block in progress.
	pub fn pending(&self) -> Option<(EventKind, usize)> {
		match &self.state {
			ParserState::Idle => None,
			ParserState::AwaitingTail { grammar, owed, .. } => Some((grammar.kind, *owed)),
		}
	}

	fn start(&mut self, grammar: EventGrammar, line: &str) -> ParseOutcome {
		let raw = RawEvent::from_line(line);
		self.state = ParserState::AwaitingTail {
			grammar,
			owed: grammar.continuation_lines,
			raw,
		};
		ParseOutcome::Pending
	}
}

fn truncated(grammar: &EventGrammar, owed: usize, raw: RawEvent) -> MalformedEventError {
	MalformedEventError::Truncated {
		kind: grammar.kind,
		expected: grammar.continuation_lines,
		received: grammar.continuation_lines.saturating_sub(owed),
		partial: raw,
	}
}

//! Wallet log ingestion
//!
//! Everything between the wallet node's text log and the transaction ledger: the grammar of the
//! two transaction events, the line-by-line parser that folds them into blocks, the resumable
//! log reader and the ingest loop that writes the results.

pub mod grammar;
pub mod ingest;
pub mod parser;
pub mod reader;
#[cfg(test)]
pub(crate) mod test_fixtures;
pub mod types;

pub use grammar::{EventFields, EventGrammar, LogGrammar};
pub use parser::{ParseOutcome, ParserState, RecordParser};
pub use reader::LogReader;
pub use types::*;

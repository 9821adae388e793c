//! Log-line grammar for wallet transaction events.
//!
//! The wallet node does not emit structured logs, so every field is read from a fixed token
//! position in the whitespace-split text of an event block. All positions live in the
//! [`RECEIVED`] and [`SENT`] tables below; the parser and the ingest loop never index tokens
//! themselves.

use crate::ledger::{Address, TransactionRecord};
use crate::txlog::types::{EventKind, Field, MalformedEventError, RawEvent};

use rust_decimal::Decimal;
use std::str::FromStr;

/// Reads one field from a fixed token position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldExtractor {
    pub field: Field,
    /// 0-based index into the concatenated tokens of the block.
    pub index: usize,
    /// Drop the token's last character (the wallet appends `;` or `,` to some values).
    pub trim: bool,
}

impl FieldExtractor {
    pub const fn new(field: Field, index: usize, trim: bool) -> Self {
        Self { field, index, trim }
    }

    fn read<'a>(&self, kind: EventKind, raw: &'a RawEvent) -> Result<&'a str, MalformedEventError> {
        let token = raw
            .token(self.index)
            .ok_or_else(|| MalformedEventError::MissingToken {
                kind,
                field: self.field,
                index: self.index,
                available: raw.len(),
                partial: raw.clone(),
            })?;
        Ok(if self.trim { strip_last_char(token) } else { token })
    }
}

/// Shape of one event block: how it is recognized, how long it is and where its fields are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventGrammar {
    pub kind: EventKind,
    /// Substring that marks the first line of the block.
    pub trigger: &'static str,
    /// Lines that follow the trigger line and belong to the same block. At least one.
    pub continuation_lines: usize,
    pub extractors: &'static [FieldExtractor],
}

pub const RECEIVED: EventGrammar = EventGrammar {
    kind: EventKind::Received,
    trigger: "New transaction received",
    continuation_lines: 1,
    extractors: &[
        FieldExtractor::new(Field::Timestamp, 0, false),
        FieldExtractor::new(Field::TxId, 9, true),
        FieldExtractor::new(Field::Amount, 19, true),
        FieldExtractor::new(Field::Source, 20, false),
    ],
};

pub const SENT: EventGrammar = EventGrammar {
    kind: EventKind::Sent,
    trigger: "created and send",
    continuation_lines: 2,
    extractors: &[
        FieldExtractor::new(Field::Timestamp, 0, false),
        FieldExtractor::new(Field::TxId, 10, true),
        FieldExtractor::new(Field::Amount, 20, true),
        FieldExtractor::new(Field::Dest, 21, false),
        FieldExtractor::new(Field::Source, 25, false),
    ],
};

impl EventGrammar {
    pub fn matches(&self, line: &str) -> bool {
        line.contains(self.trigger)
    }

    /// Pull every field of this event out of a complete block.
    pub fn extract(&self, raw: &RawEvent) -> Result<EventFields, MalformedEventError> {
        let mut source = None;
        let mut dest = None;
        let mut amount = None;
        let mut tx_id = None;
        let mut timestamp = None;

        for extractor in self.extractors {
            let value = extractor.read(self.kind, raw)?;
            if value.is_empty() {
                return Err(self.invalid(extractor.field, value, raw));
            }
            match extractor.field {
                Field::Source => source = Some(value.to_string()),
                Field::Dest => dest = Some(value.to_string()),
                Field::TxId => tx_id = Some(value.to_string()),
                Field::Timestamp => timestamp = Some(value.to_string()),
                Field::Amount => {
                    let parsed = Decimal::from_str(value)
                        .map_err(|_| self.invalid(Field::Amount, value, raw))?;
                    amount = Some(parsed);
                }
            }
        }

        Ok(EventFields {
            kind: self.kind,
            source: source.ok_or_else(|| self.invalid(Field::Source, "", raw))?,
            dest,
            amount: amount.ok_or_else(|| self.invalid(Field::Amount, "", raw))?,
            tx_id: tx_id.ok_or_else(|| self.invalid(Field::TxId, "", raw))?,
            timestamp: timestamp.ok_or_else(|| self.invalid(Field::Timestamp, "", raw))?,
        })
    }

    fn invalid(&self, field: Field, value: &str, raw: &RawEvent) -> MalformedEventError {
        MalformedEventError::InvalidField {
            kind: self.kind,
            field,
            value: value.to_string(),
            partial: raw.clone(),
        }
    }
}

/// The set of event shapes recognized in the wallet log.
#[derive(Debug, Clone)]
pub struct LogGrammar {
    events: Vec<EventGrammar>,
}

impl Default for LogGrammar {
    fn default() -> Self {
        Self::new(vec![RECEIVED, SENT])
    }
}

impl LogGrammar {
    /// Triggers are tried in order; the first match wins.
    pub fn new(events: Vec<EventGrammar>) -> Self {
        debug_assert!(events.iter().all(|event| event.continuation_lines > 0));
        Self { events }
    }

    /// Find the event a line starts, if any.
    pub fn classify(&self, line: &str) -> Option<&EventGrammar> {
        self.events.iter().find(|event| event.matches(line))
    }
}

/// Fields of one recognized event, before they are split into ledger legs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    pub kind: EventKind,
    pub source: Address,
    /// Recipient of a sent transfer.
    pub dest: Option<Address>,
    /// Amount exactly as logged, without the sign of the leg applied.
    pub amount: Decimal,
    pub tx_id: String,
    pub timestamp: String,
}

impl EventFields {
    /// Address whose directory membership decides whether a mirrored inflow leg is written.
    pub fn mirror_candidate(&self) -> Option<&str> {
        match self.kind {
            EventKind::Sent => self.dest.as_deref(),
            EventKind::Received => None,
        }
    }

    /// Split the event into ledger legs.
    ///
    /// A received event yields one inflow leg. A sent event yields the sender's outflow leg and,
    /// when `dest_tracked` is set, the recipient's inflow leg, in that order.
    pub fn into_records(self, dest_tracked: bool) -> Vec<TransactionRecord> {
        match self.kind {
            EventKind::Received => vec![TransactionRecord {
                source: self.source,
                dest: None,
                amount: self.amount,
                tx_id: self.tx_id,
                timestamp: self.timestamp,
            }],
            EventKind::Sent => {
                let mirror = match (&self.dest, dest_tracked) {
                    (Some(dest), true) => Some(TransactionRecord {
                        source: dest.clone(),
                        dest: None,
                        amount: self.amount,
                        tx_id: self.tx_id.clone(),
                        timestamp: self.timestamp.clone(),
                    }),
                    _ => None,
                };

                let mut records = vec![TransactionRecord {
                    source: self.source,
                    dest: self.dest,
                    amount: -self.amount,
                    tx_id: self.tx_id,
                    timestamp: self.timestamp,
                }];
                records.extend(mirror);
                records
            }
        }
    }
}

fn strip_last_char(token: &str) -> &str {
    let mut chars = token.chars();
    chars.next_back();
    chars.as_str()
}

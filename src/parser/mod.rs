//! Record parsing
//!
//! Turns extracted [`RawRecord`]s into [`Mutation`]s. A malformed record is
//! skipped and counted by [`RecordParser::parse_all`]; it never fails the batch.

pub mod mutation;

pub use mutation::MutationParser;

use thiserror::Error;
use tracing::warn;

use crate::models::{Mutation, RawRecord};

/// Errors for a single record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Required fields absent or blank
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid transaction type: {0}")]
    InvalidTransactionType(String),
}

/// Result of parsing a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    /// Successfully parsed records, in input order
    pub mutations: Vec<Mutation>,
    /// Number of records skipped
    pub failed: usize,
}

/// Per-record parser
pub trait RecordParser: Send + Sync {
    /// Parse one record
    fn parse(&self, record: &RawRecord) -> Result<Mutation, ParseError>;

    /// Parse a batch, skipping and counting records that fail
    fn parse_all(&self, records: &[RawRecord]) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();

        for (index, record) in records.iter().enumerate() {
            match self.parse(record) {
                Ok(mutation) => outcome.mutations.push(mutation),
                Err(e) => {
                    warn!(row = index, error = %e, "Skipping unparseable record");
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}

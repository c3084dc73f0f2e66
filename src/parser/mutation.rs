//! Field-level parser for transaction rows
//!
//! Expected fields (names as produced by the portal extractor):
//! - `date` (required): `2024-03-01`, `01.03.2024`, `01. 03. 2024` or `01/03/2024`
//! - `amount` (required): optional sign and currency, thousand separators,
//!   `.` or `,` as decimal mark
//! - `type` (optional): credit/debit and common synonyms; when absent the
//!   amount sign decides
//! - `currency`, `counterparty`, `description` (optional)

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use super::{ParseError, RecordParser};
use crate::models::{Mutation, MutationKind, RawRecord};
use crate::utils::normalize_whitespace;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d. %m. %Y", "%d/%m/%Y"];

const REQUIRED_FIELDS: &[&str] = &["date", "amount"];

/// Parser for [`Mutation`] records
#[derive(Debug, Clone)]
pub struct MutationParser {
    default_currency: String,
}

impl Default for MutationParser {
    fn default() -> Self {
        Self {
            default_currency: "EUR".to_string(),
        }
    }
}

impl MutationParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currency used when a record carries none
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into().to_uppercase();
        self
    }
}

fn field<'a>(record: &'a RawRecord, name: &str) -> Option<&'a str> {
    record
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

/// Parse a date in any of the supported formats
pub fn parse_date(raw: &str) -> Result<NaiveDate, ParseError> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| ParseError::InvalidDate(trimmed.to_string()))
}

fn amount_re() -> &'static Regex {
    static AMOUNT_RE: OnceLock<Regex> = OnceLock::new();
    AMOUNT_RE.get_or_init(|| {
        Regex::new(
            r"^(?:[A-Za-z]{3}|[€$£]|Kč)?([+\-−]?)(?:[A-Za-z]{3}|[€$£]|Kč)?([0-9][0-9.,']*)(?:[A-Za-z]{3}|[€$£]|Kč)?$",
        )
        .expect("Invalid regex pattern")
    })
}

fn grouped_integer_re() -> &'static Regex {
    static GROUPED_RE: OnceLock<Regex> = OnceLock::new();
    GROUPED_RE.get_or_init(|| {
        Regex::new(r"^(?:[0-9]+|[0-9]{1,3}(?:[.,][0-9]{3})+)$").expect("Invalid regex pattern")
    })
}

fn to_minor_units(number: &str) -> Option<i64> {
    let number: String = number.chars().filter(|c| *c != '\'').collect();

    let (int_part, frac_part) = match number.rfind(['.', ',']) {
        Some(pos) if (1..=2).contains(&(number.len() - pos - 1)) => {
            (&number[..pos], &number[pos + 1..])
        }
        _ => (number.as_str(), ""),
    };

    if !grouped_integer_re().is_match(int_part) {
        return None;
    }

    // A decimal mark may not double as the thousands separator
    if let Some(mark) = number[int_part.len()..].chars().next() {
        if int_part.contains(mark) {
            return None;
        }
    }

    let whole: i64 = int_part
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()?;

    let frac: i64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().ok()? * 10,
        _ => frac_part.parse().ok()?,
    };

    whole.checked_mul(100)?.checked_add(frac)
}

/// Parse a signed amount into minor units
pub fn parse_amount(raw: &str) -> Result<i64, ParseError> {
    let invalid = || ParseError::InvalidAmount(raw.trim().to_string());

    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();

    let captures = amount_re().captures(&compact).ok_or_else(invalid)?;
    let negative = matches!(captures.get(1).map(|m| m.as_str()), Some("-" | "−"));
    let magnitude = captures
        .get(2)
        .and_then(|m| to_minor_units(m.as_str()))
        .ok_or_else(invalid)?;

    Ok(if negative { -magnitude } else { magnitude })
}

/// Parse a transaction type label
pub fn parse_kind(raw: &str) -> Result<MutationKind, ParseError> {
    match raw.trim().to_lowercase().as_str() {
        "credit" | "cr" | "incoming" | "in" | "deposit" | "+" => Ok(MutationKind::Credit),
        "debit" | "dr" | "outgoing" | "out" | "withdrawal" | "payment" | "-" => {
            Ok(MutationKind::Debit)
        }
        _ => Err(ParseError::InvalidTransactionType(raw.trim().to_string())),
    }
}

impl RecordParser for MutationParser {
    fn parse(&self, record: &RawRecord) -> Result<Mutation, ParseError> {
        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|name| field(record, name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ParseError::MissingFields(missing));
        }

        let date = parse_date(field(record, "date").unwrap_or_default())?;
        let amount = parse_amount(field(record, "amount").unwrap_or_default())?;

        let (kind, amount_minor) = match field(record, "type") {
            Some(label) => match parse_kind(label)? {
                MutationKind::Credit => (MutationKind::Credit, amount.abs()),
                MutationKind::Debit => (MutationKind::Debit, -amount.abs()),
            },
            None if amount < 0 => (MutationKind::Debit, amount),
            None => (MutationKind::Credit, amount),
        };

        let currency = field(record, "currency")
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());

        Ok(Mutation {
            date,
            amount_minor,
            currency,
            kind,
            counterparty: field(record, "counterparty").map(normalize_whitespace),
            description: field(record, "description")
                .map(normalize_whitespace)
                .unwrap_or_default(),
        })
    }
}

//! Failure classification and recovery decisions
//!
//! [`RecoveryClassifier::classify`] maps a failure message plus its attempt
//! context to a [`FailureCategory`], a recoverability verdict and a
//! [`RecoveryAction`]. Categorization is an ordered rule table evaluated top to
//! bottom over the lower-cased message; the first rule that matches wins and
//! unmatched messages fall into [`FailureCategory::ExecutionEnvironment`].
//!
//! | Priority | Category             | Markers                                                        |
//! |----------|----------------------|----------------------------------------------------------------|
//! | 1        | Authentication       | authentication, login, credential, unauthorized, 401           |
//! | 2        | Network              | network, timeout, connection refused, not found, dns, proxy    |
//! | 3        | ExecutionEnvironment | browser, page, navigation, element not found, selector         |
//! | 4        | Parsing              | parse, invalid date/amount/transaction type, missing required fields |
//! | 5        | Delivery             | webhook, http request failed, fetch + failed                   |
//! | 6        | Configuration        | config, validation, required field                             |
//!
//! Everything here is a pure function of its inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Fixed cooldown after a recoverable authentication failure
pub const AUTH_RETRY_DELAY_SECS: u64 = 30;

/// Backoff cap for network failures
pub const NETWORK_BACKOFF_CAP_SECS: u64 = 60;

/// Backoff cap for delivery failures
pub const DELIVERY_BACKOFF_CAP_SECS: u64 = 30;

/// Environment fallbacks stop being offered from this attempt on
pub const MAX_ENVIRONMENT_FALLBACK_ATTEMPT: u32 = 3;

/// Alternative named by environment fallbacks
pub const NEXT_ENVIRONMENT: &str = "next-environment-type";

/// Exit code of fatal configuration failures
pub const FATAL_EXIT_CODE: i32 = 1;

// ============================================================================
// Types
// ============================================================================

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Authentication,
    Network,
    ExecutionEnvironment,
    Parsing,
    Delivery,
    Configuration,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Network => "network",
            Self::ExecutionEnvironment => "execution_environment",
            Self::Parsing => "parsing",
            Self::Delivery => "delivery",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category plus recoverability of one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureClassification {
    pub category: FailureCategory,
    pub recoverable: bool,
}

/// What the caller should do about a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Try again after the delay
    Retry { delay_seconds: u64 },
    /// Abandon the current cycle
    Skip,
    /// Try again with a different resource
    Fallback { alternative: String },
    /// Stop the process with the exit code
    Fatal { exit_code: i32 },
}

impl RecoveryAction {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Delay before the retry, if this is a retry
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Retry { delay_seconds } => Some(Duration::from_secs(*delay_seconds)),
            _ => None,
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry { delay_seconds } => write!(f, "retry in {delay_seconds}s"),
            Self::Skip => write!(f, "skip"),
            Self::Fallback { alternative } => write!(f, "fallback to {alternative}"),
            Self::Fatal { exit_code } => write!(f, "fatal (exit {exit_code})"),
        }
    }
}

/// Where a failure happened, and how many tries the caller allows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptContext {
    pub operation: String,
    /// 1-based
    pub attempt: u32,
    pub max_attempts: u32,
    pub started_at: DateTime<Utc>,
}

impl AttemptContext {
    pub fn new(operation: impl Into<String>, attempt: u32, max_attempts: u32) -> Self {
        Self {
            operation: operation.into(),
            attempt,
            max_attempts,
            started_at: Utc::now(),
        }
    }
}

// ============================================================================
// Categorization
// ============================================================================

struct Rule {
    category: FailureCategory,
    matches: fn(&str) -> bool,
}

const RULES: &[Rule] = &[
    Rule {
        category: FailureCategory::Authentication,
        matches: is_authentication,
    },
    Rule {
        category: FailureCategory::Network,
        matches: is_network,
    },
    Rule {
        category: FailureCategory::ExecutionEnvironment,
        matches: is_execution_environment,
    },
    Rule {
        category: FailureCategory::Parsing,
        matches: is_parsing,
    },
    Rule {
        category: FailureCategory::Delivery,
        matches: is_delivery,
    },
    Rule {
        category: FailureCategory::Configuration,
        matches: is_configuration,
    },
];

fn contains_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| text.contains(marker))
}

fn is_authentication(text: &str) -> bool {
    contains_any(
        text,
        &["authentication", "login", "credential", "unauthorized", "401"],
    )
}

fn is_network(text: &str) -> bool {
    contains_any(
        text,
        &["network", "timeout", "connection refused", "not found", "dns", "proxy"],
    )
}

fn is_execution_environment(text: &str) -> bool {
    contains_any(
        text,
        &["browser", "page", "navigation", "element not found", "selector"],
    )
}

fn is_parsing(text: &str) -> bool {
    contains_any(
        text,
        &[
            "parse",
            "invalid date",
            "invalid amount",
            "invalid transaction type",
            "missing required fields",
        ],
    )
}

fn is_delivery(text: &str) -> bool {
    contains_any(text, &["webhook", "http request failed"])
        || (text.contains("fetch") && text.contains("failed"))
}

fn is_configuration(text: &str) -> bool {
    contains_any(text, &["config", "validation", "required field"])
}

/// Category of a failure message (case-insensitive)
pub fn categorize(description: &str) -> FailureCategory {
    let text = description.to_lowercase();
    RULES
        .iter()
        .find(|rule| (rule.matches)(&text))
        .map(|rule| rule.category)
        .unwrap_or(FailureCategory::ExecutionEnvironment)
}

// ============================================================================
// Recovery
// ============================================================================

/// Configuration failures never recover; the rest recover while attempts remain
pub fn is_recoverable(category: FailureCategory, context: &AttemptContext) -> bool {
    match category {
        FailureCategory::Configuration => false,
        _ => context.attempt < context.max_attempts,
    }
}

fn capped_backoff(attempt: u32, cap_secs: u64) -> u64 {
    2u64.saturating_pow(attempt).min(cap_secs)
}

/// Action prescribed for a classified failure
pub fn determine_action(
    classification: &FailureClassification,
    context: &AttemptContext,
) -> RecoveryAction {
    use FailureCategory::*;

    match (classification.recoverable, classification.category) {
        (false, Configuration) => RecoveryAction::Fatal {
            exit_code: FATAL_EXIT_CODE,
        },
        (false, _) => RecoveryAction::Skip,
        (true, Authentication) => RecoveryAction::Retry {
            delay_seconds: AUTH_RETRY_DELAY_SECS,
        },
        (true, Network) => RecoveryAction::Retry {
            delay_seconds: capped_backoff(context.attempt, NETWORK_BACKOFF_CAP_SECS),
        },
        (true, ExecutionEnvironment) if context.attempt < MAX_ENVIRONMENT_FALLBACK_ATTEMPT => {
            RecoveryAction::Fallback {
                alternative: NEXT_ENVIRONMENT.to_string(),
            }
        }
        (true, Delivery) => RecoveryAction::Retry {
            delay_seconds: capped_backoff(context.attempt, DELIVERY_BACKOFF_CAP_SECS),
        },
        (true, Parsing) => RecoveryAction::Skip,
        _ => RecoveryAction::Skip,
    }
}

/// Stateless failure classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryClassifier;

impl RecoveryClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a failure message and pick the recovery action
    pub fn classify(
        &self,
        description: &str,
        context: &AttemptContext,
    ) -> (FailureClassification, RecoveryAction) {
        let category = categorize(description);
        let classification = FailureClassification {
            category,
            recoverable: is_recoverable(category, context),
        };
        let action = determine_action(&classification, context);
        (classification, action)
    }
}

// ============================================================================
// Tests
// ============================================================================

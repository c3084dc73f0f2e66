//! Unified error handling for the portalwatch crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while keeping the domain errors usable on
//! their own.
//!
//! Every message is rendered so that the recovery classifier's keyword cascade
//! (see [`crate::scheduler::recovery`]) lands on the intended category. The
//! category of an [`Error`] is therefore derived from its `Display` output; there
//! is no second mapping to keep in sync.
//!
//! # Usage
//!
//! ```rust,ignore
//! use portalwatch::error::Error;
//! use portalwatch::scheduler::FailureCategory;
//!
//! let err = Error::authentication("bad password");
//! assert_eq!(err.category(), FailureCategory::Authentication);
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::delivery::DeliveryError;
pub use crate::parser::ParseError;
pub use crate::scheduler::error::SchedulerError;

use crate::scheduler::recovery::{categorize, FailureCategory};

/// Unified error type for the portalwatch crate
#[derive(Error, Debug)]
pub enum Error {
    /// Login rejected or unexpected post-login state
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Connectivity problems reaching the portal or the egress route
    #[error("Network error: {0}")]
    Network(String),

    /// Execution-environment failures (session setup, page state, selectors)
    #[error("Browser error: {0}")]
    Browser(String),

    /// Per-record parse errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Outbound delivery errors
    #[error("{0}")]
    Delivery(#[from] DeliveryError),

    /// Scheduler construction and state errors
    #[error("{0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// HTTP client errors raised while talking to the portal, without the URL
    #[error("Network error: {0}")]
    Http(#[source] reqwest::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config file errors
    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create an execution-environment error
    pub fn browser(msg: impl Into<String>) -> Self {
        Self::Browser(msg.into())
    }

    /// Failure category as assigned by the recovery classifier
    pub fn category(&self) -> FailureCategory {
        categorize(&self.to_string())
    }

    /// Check if this error may succeed on a later attempt
    pub fn is_recoverable(&self) -> bool {
        self.category() != FailureCategory::Configuration
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.without_url())
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

//! Outbound delivery of check results
//!
//! A [`DeliveryClient`] pushes the mutations found by one cycle to a configured
//! endpoint through a [`DeliveryTransport`]. Each attempt builds a fresh
//! [`DeliveryPayload`]; failed attempts back off 1s, 2s, 4s, ... and the final
//! failure is reported as [`DeliveryError::Exhausted`].
//!
//! # Payload Format
//!
//! ```json
//! {
//!   "timestamp": "2024-03-01T12:00:00Z",
//!   "account": "CZ65 0800 0000 1920 0014 5399",
//!   "mutations": [
//!     {
//!       "date": "2024-03-01",
//!       "amount_minor": -25000,
//!       "currency": "CZK",
//!       "kind": "debit",
//!       "counterparty": "ACME s.r.o.",
//!       "description": "Invoice 42"
//!     }
//!   ]
//! }
//! ```

pub mod webhook;

pub use webhook::{DeliveryConfig, HttpTransport};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::models::Mutation;
use crate::utils::retry::{with_retry, RetryConfig};

/// Attempts per delivery when none are configured
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Errors that can occur while delivering results
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Transport-level failure (connect, TLS, timeout), stored without the URL
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    /// Endpoint answered outside the 2xx range
    #[error("Webhook returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Every attempt failed
    #[error("Webhook delivery failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// Invalid delivery settings
    #[error("Invalid delivery config: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.without_url())
    }
}

/// Body of one delivery attempt
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryPayload<'a> {
    pub timestamp: DateTime<Utc>,
    pub account: &'a str,
    pub mutations: &'a [Mutation],
}

impl<'a> DeliveryPayload<'a> {
    /// Payload stamped with the current time
    pub fn new(account: &'a str, mutations: &'a [Mutation]) -> Self {
        Self {
            timestamp: Utc::now(),
            account,
            mutations,
        }
    }
}

/// One outbound delivery attempt
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    /// Deliver the payload once; `Ok` only on a 2xx acknowledgement
    async fn deliver(&self, payload: &DeliveryPayload<'_>) -> Result<(), DeliveryError>;
}

/// Delivery with bounded retries and exponential backoff
#[derive(Clone)]
pub struct DeliveryClient {
    transport: Arc<dyn DeliveryTransport>,
    max_attempts: u32,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn DeliveryTransport>, max_attempts: u32) -> Self {
        Self {
            transport,
            max_attempts: max_attempts.max(1),
        }
    }

    /// HTTP webhook client for the given settings
    pub fn from_config(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        let transport = HttpTransport::new(config.clone())?;
        Ok(Self::new(Arc::new(transport), config.max_attempts))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deliver `records` using the configured attempt budget
    pub async fn send(&self, records: &[Mutation], account: &str) -> Result<(), DeliveryError> {
        self.send_with_retry(records, account, self.max_attempts)
            .await
    }

    /// Deliver `records`, trying up to `max_attempts` times
    pub async fn send_with_retry(
        &self,
        records: &[Mutation],
        account: &str,
        max_attempts: u32,
    ) -> Result<(), DeliveryError> {
        let retry = RetryConfig::attempts(max_attempts).uncapped();
        let transport = &self.transport;

        let result = with_retry(&retry, move || async move {
            let payload = DeliveryPayload::new(account, records);
            transport.deliver(&payload).await
        })
        .await;

        match result {
            Ok(()) => {
                info!(
                    transport = self.transport.name(),
                    account = account,
                    mutations = records.len(),
                    "Delivered check results"
                );
                Ok(())
            }
            Err(e) => Err(DeliveryError::Exhausted {
                attempts: retry.max_attempts(),
                last_error: e.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("transport", &self.transport.name())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

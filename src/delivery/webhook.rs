//! HTTP webhook transport
//!
//! Posts a [`DeliveryPayload`] as JSON. Any 2xx status acknowledges the
//! delivery; retries are left to [`DeliveryClient`](super::DeliveryClient).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{DeliveryError, DeliveryPayload, DeliveryTransport, DEFAULT_MAX_ATTEMPTS};
use crate::utils::truncate_text;

/// Longest response body kept in a status error
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Webhook delivery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Endpoint URL
    pub url: String,
    /// Optional authentication token (sent as Bearer token)
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Custom headers to include in requests
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Attempts per delivery, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl DeliveryConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            headers: HashMap::new(),
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
        }
    }

    /// Set authentication token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Add a custom header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), DeliveryError> {
        if self.url.trim().is_empty() {
            return Err(DeliveryError::InvalidConfig(
                "delivery url cannot be empty".to_string(),
            ));
        }

        let url = Url::parse(&self.url)
            .map_err(|e| DeliveryError::InvalidConfig(format!("malformed delivery url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::InvalidConfig(format!(
                "delivery url must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.timeout_secs == 0 {
            return Err(DeliveryError::InvalidConfig(
                "request deadline must be at least one second".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(DeliveryError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Webhook transport over reqwest
pub struct HttpTransport {
    config: DeliveryConfig,
    client: Client,
}

impl HttpTransport {
    pub fn new(config: DeliveryConfig) -> Result<Self, DeliveryError> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    /// Get the webhook URL
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, payload: &DeliveryPayload<'_>) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.config.url);

        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.json(payload).send().await?;
        let status = response.status();

        if status.is_success() {
            debug!(url = %self.config.url, status = status.as_u16(), "Webhook acknowledged");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());

        Err(DeliveryError::Status {
            status: status.as_u16(),
            body: truncate_text(&body, MAX_ERROR_BODY_CHARS),
        })
    }
}

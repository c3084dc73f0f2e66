//! Form-login portal over HTTP
//!
//! Each session owns a `reqwest::Client` with its own cookie jar, routed
//! through the session's egress proxy and presenting the session's identity.

use async_trait::async_trait;
use reqwest::{Client, Proxy, StatusCode};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::headers::build_browser_headers;
use super::{Authenticator, Fetcher, Session, SessionProvider};
use crate::error::{Error, Result};
use crate::models::{Credentials, EgressRoute, EnvironmentType, RawRecord};
use crate::utils::normalize_whitespace;

/// Portal endpoints and extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Absolute base URL; paths below are joined onto it
    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_login_path")]
    pub login_path: String,

    #[serde(default = "default_transactions_path")]
    pub transactions_path: String,

    #[serde(default = "default_logout_path")]
    pub logout_path: String,

    /// Form field carrying the username
    #[serde(default = "default_username_field")]
    pub username_field: String,

    /// Form field carrying the password
    #[serde(default = "default_password_field")]
    pub password_field: String,

    /// Text present only once signed in. Without it, a page that still shows
    /// the password input counts as a failed sign-in.
    #[serde(default)]
    pub success_marker: Option<String>,

    /// CSS selector matching one transaction row
    #[serde(default = "default_row_selector")]
    pub row_selector: String,

    /// CSS selector matching the cells within a row
    #[serde(default = "default_cell_selector")]
    pub cell_selector: String,

    /// Field name per cell position; empty names drop the cell
    #[serde(default = "default_columns")]
    pub columns: Vec<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_transactions_path() -> String {
    "/transactions".to_string()
}

fn default_logout_path() -> String {
    "/logout".to_string()
}

fn default_username_field() -> String {
    "username".to_string()
}

fn default_password_field() -> String {
    "password".to_string()
}

fn default_row_selector() -> String {
    "table tbody tr".to_string()
}

fn default_cell_selector() -> String {
    "td".to_string()
}

fn default_columns() -> Vec<String> {
    ["date", "description", "counterparty", "amount", "currency"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_timeout() -> u64 {
    30
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            login_path: default_login_path(),
            transactions_path: default_transactions_path(),
            logout_path: default_logout_path(),
            username_field: default_username_field(),
            password_field: default_password_field(),
            success_marker: None,
            row_selector: default_row_selector(),
            cell_selector: default_cell_selector(),
            columns: default_columns(),
            timeout_secs: default_timeout(),
        }
    }
}

impl PortalConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Parsed base URL
    pub fn base(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("portal base_url '{}': {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "portal base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        Ok(url)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.base()?;
        css(&self.row_selector, "rows")?;
        css(&self.cell_selector, "cells")?;

        if self.columns.iter().all(|c| c.trim().is_empty()) {
            return Err(Error::config("portal columns must name at least one field"));
        }

        if self.timeout_secs == 0 {
            return Err(Error::config("portal request deadline must be at least one second"));
        }

        Ok(())
    }
}

// Keep "selector" out of these messages; it is an execution-environment marker
fn css(pattern: &str, setting: &str) -> Result<Selector> {
    Selector::parse(pattern)
        .map_err(|_| Error::config(format!("portal {setting} setting '{pattern}' is not valid CSS")))
}

/// Reference portal collaborator
pub struct HttpPortal {
    config: PortalConfig,
    base: Url,
    row_selector: Selector,
    cell_selector: Selector,
    hidden_input_selector: Selector,
    password_input_selector: Selector,
    clients: Mutex<HashMap<Uuid, Client>>,
}

impl HttpPortal {
    pub fn new(config: PortalConfig) -> Result<Self> {
        config.validate()?;

        let base = config.base()?;
        let row_selector = css(&config.row_selector, "rows")?;
        let cell_selector = css(&config.cell_selector, "cells")?;
        let hidden_input_selector = css(r#"input[type="hidden"]"#, "hidden input")?;
        let password_input_selector = css(
            &format!(r#"input[name="{}"]"#, config.password_field),
            "password field",
        )?;

        Ok(Self {
            config,
            base,
            row_selector,
            cell_selector,
            hidden_input_selector,
            password_input_selector,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Number of sessions currently open
    pub async fn open_sessions(&self) -> usize {
        self.clients.lock().await.len()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::config(format!("portal path '{path}': {e}")))
    }

    async fn client(&self, session: &Session) -> Result<Client> {
        self.clients
            .lock()
            .await
            .get(&session.id)
            .cloned()
            .ok_or_else(|| {
                debug!(session = %session.id, "Session lookup failed");
                Error::browser("session is not open")
            })
    }

    fn build_client(
        &self,
        environment: EnvironmentType,
        identity: &str,
        route: Option<&EgressRoute>,
    ) -> Result<Client> {
        let headers = build_browser_headers(environment, identity, Some(self.base.as_str()))?;

        let mut builder = Client::builder()
            .cookie_store(true)
            .gzip(true)
            .default_headers(headers)
            .timeout(Duration::from_secs(self.config.timeout_secs));

        if let Some(route) = route {
            let mut proxy = Proxy::all(&route.server)
                .map_err(|e| Error::network(format!("proxy {} unusable: {e}", route.label())))?;
            if let Some(username) = &route.username {
                proxy = proxy.basic_auth(username, route.password.as_deref().unwrap_or_default());
            }
            builder = builder.proxy(proxy);
        } else {
            builder = builder.no_proxy();
        }

        builder
            .build()
            .map_err(|e| Error::browser(format!("failed to open session: {e}")))
    }

    /// Extract one record per matched row
    ///
    /// Rows without matching cells (header rows) are dropped; no matching rows
    /// yields an empty list.
    pub fn extract_rows(&self, html: &str) -> Vec<RawRecord> {
        let document = Html::parse_document(html);

        document
            .select(&self.row_selector)
            .filter_map(|row| {
                let cells: Vec<String> = row
                    .select(&self.cell_selector)
                    .map(|cell| normalize_whitespace(&cell.text().collect::<String>()))
                    .collect();

                if cells.is_empty() {
                    return None;
                }

                let record: RawRecord = self
                    .config
                    .columns
                    .iter()
                    .zip(cells)
                    .filter(|(name, _)| !name.trim().is_empty())
                    .map(|(name, value)| (name.trim().to_string(), value))
                    .collect();

                Some(record)
            })
            .collect()
    }

    fn hidden_fields(&self, html: &str) -> Vec<(String, String)> {
        let document = Html::parse_document(html);

        document
            .select(&self.hidden_input_selector)
            .filter_map(|input| {
                let name = input.value().attr("name")?;
                let value = input.value().attr("value").unwrap_or_default();
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }

    fn signed_in(&self, html: &str) -> bool {
        match &self.config.success_marker {
            Some(marker) => html.contains(marker.as_str()),
            None => {
                let document = Html::parse_document(html);
                document.select(&self.password_input_selector).next().is_none()
            }
        }
    }
}

#[async_trait]
impl SessionProvider for HttpPortal {
    async fn acquire(
        &self,
        environment: EnvironmentType,
        identity: &str,
        route: Option<&EgressRoute>,
    ) -> Result<Session> {
        let client = self.build_client(environment, identity, route)?;
        let session = Session::new(environment, identity.to_string(), route.cloned());

        self.clients.lock().await.insert(session.id, client);
        debug!(session = %session.id, environment = %environment, "Session opened");

        Ok(session)
    }

    async fn release(&self, session: Session) {
        if self.clients.lock().await.remove(&session.id).is_some() {
            debug!(session = %session.id, "Session released");
        }
    }
}

#[async_trait]
impl Authenticator for HttpPortal {
    #[instrument(skip(self, session, credentials), fields(session = %session.id))]
    async fn authenticate(&self, session: &Session, credentials: &Credentials) -> Result<()> {
        let client = self.client(session).await?;
        let url = self.endpoint(&self.config.login_path)?;

        // The sign-in form may carry hidden anti-forgery fields
        let form_page = client.get(url.clone()).send().await?;
        if !form_page.status().is_success() {
            return Err(Error::network(format!(
                "portal returned HTTP {} for the sign-in form",
                form_page.status().as_u16()
            )));
        }
        let form_html = form_page.text().await?;

        let mut form = self.hidden_fields(&form_html);
        form.push((self.config.username_field.clone(), credentials.username.clone()));
        form.push((self.config.password_field.clone(), credentials.password.clone()));

        let response = client.post(url).form(&form).send().await?;
        let status = response.status();

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(Error::authentication(format!(
                "portal rejected credentials (HTTP {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(Error::network(format!(
                "portal returned HTTP {} after sign-in",
                status.as_u16()
            )));
        }

        let body = response.text().await?;
        if !self.signed_in(&body) {
            return Err(Error::authentication(
                "unexpected page after sign-in (still on the sign-in form or marker missing)",
            ));
        }

        info!("Signed in to portal");
        Ok(())
    }

    async fn logout(&self, session: &Session) {
        let client = match self.client(session).await {
            Ok(client) => client,
            Err(_) => return,
        };

        let url = match self.endpoint(&self.config.logout_path) {
            Ok(url) => url,
            Err(e) => {
                warn!(session = %session.id, error = %e, "Skipping logout");
                return;
            }
        };

        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(session = %session.id, "Logged out");
            }
            Ok(response) => {
                warn!(
                    session = %session.id,
                    status = response.status().as_u16(),
                    "Logout returned a non-success status"
                );
            }
            Err(e) => {
                warn!(session = %session.id, error = %e, "Logout request failed");
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpPortal {
    #[instrument(skip(self, session), fields(session = %session.id))]
    async fn fetch_and_extract(&self, session: &Session) -> Result<Vec<RawRecord>> {
        let client = self.client(session).await?;
        let url = self.endpoint(&self.config.transactions_path)?;

        let response = client.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::authentication("portal session is unauthorized (HTTP 401)"));
        }
        if !status.is_success() {
            return Err(Error::network(format!(
                "portal returned HTTP {} for the transaction listing",
                status.as_u16()
            )));
        }

        let html = response.text().await?;
        let records = self.extract_rows(&html);
        debug!(rows = records.len(), "Extracted transaction rows");

        Ok(records)
    }
}

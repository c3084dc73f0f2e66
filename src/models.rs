// Core data structures shared by the check engine and its collaborators

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// ============================================================================
// Execution Environment
// ============================================================================

/// Browser family a session is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    /// Chromium-based (Chrome, Edge)
    Chromium,
    /// Gecko-based (Firefox)
    Firefox,
    /// WebKit-based (Safari)
    Webkit,
}

impl EnvironmentType {
    /// Get all environment types, in default rotation order
    pub fn all() -> Vec<Self> {
        vec![Self::Chromium, Self::Firefox, Self::Webkit]
    }

    /// Get environment ID as string
    pub fn id(&self) -> &'static str {
        match self {
            Self::Chromium => "chromium",
            Self::Firefox => "firefox",
            Self::Webkit => "webkit",
        }
    }

    /// Parse from string (case-insensitive, accepts common aliases)
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "chromium" | "chrome" => Some(Self::Chromium),
            "firefox" | "gecko" => Some(Self::Firefox),
            "webkit" | "safari" => Some(Self::Webkit),
            _ => None,
        }
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for EnvironmentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s).ok_or_else(|| {
            Error::config(format!(
                "unknown environment type '{s}' (expected chromium, firefox or webkit)"
            ))
        })
    }
}

// ============================================================================
// Egress Route
// ============================================================================

/// Outbound network path for one cycle (an HTTP proxy with optional auth)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRoute {
    /// Proxy address, e.g. `http://10.0.0.5:3128`
    pub server: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl EgressRoute {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Route label for logs: `user@server` or just `server`
    pub fn label(&self) -> String {
        match &self.username {
            Some(user) => format!("{user}@{}", self.server),
            None => self.server.clone(),
        }
    }
}

impl fmt::Debug for EgressRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EgressRoute")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Portal login credentials plus the account the results belong to
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Account identifier reported in delivery payloads
    pub account: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            account: account.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("account", &self.account)
            .finish()
    }
}

// ============================================================================
// Records
// ============================================================================

/// One extracted row: field name to raw cell text
pub type RawRecord = BTreeMap<String, String>;

/// Direction of an account mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Credit,
    Debit,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }
}

/// Parsed account mutation (one transaction row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub date: NaiveDate,
    /// Signed amount in minor currency units (cents); debits are negative
    pub amount_minor: i64,
    pub currency: String,
    pub kind: MutationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_from_id() {
        assert_eq!(EnvironmentType::from_id("Chromium"), Some(EnvironmentType::Chromium));
        assert_eq!(EnvironmentType::from_id("safari"), Some(EnvironmentType::Webkit));
        assert_eq!(EnvironmentType::from_id("gecko"), Some(EnvironmentType::Firefox));
        assert_eq!(EnvironmentType::from_id("lynx"), None);
        assert!("lynx".parse::<EnvironmentType>().is_err());
    }

    #[test]
    fn test_environment_serde_lowercase() {
        let json = serde_json::to_string(&EnvironmentType::Webkit).unwrap();
        assert_eq!(json, "\"webkit\"");
    }

    #[test]
    fn test_route_label() {
        let plain = EgressRoute::new("http://10.0.0.1:3128");
        assert_eq!(plain.label(), "http://10.0.0.1:3128");

        let authed = plain.with_auth("bob", "hunter2");
        assert_eq!(authed.label(), "bob@http://10.0.0.1:3128");
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let route = EgressRoute::new("http://proxy:8080").with_auth("bob", "hunter2");
        assert!(!format!("{route:?}").contains("hunter2"));

        let creds = Credentials::new("alice", "s3cret", "ACC-1");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("alice"));
    }

    #[test]
    fn test_mutation_serialization_skips_missing_counterparty() {
        let mutation = Mutation {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            amount_minor: -1250,
            currency: "EUR".to_string(),
            kind: MutationKind::Debit,
            counterparty: None,
            description: "Coffee".to_string(),
        };

        let value = serde_json::to_value(&mutation).unwrap();
        assert_eq!(value["date"], "2024-03-01");
        assert_eq!(value["kind"], "debit");
        assert!(value.get("counterparty").is_none());
    }
}

//! Configuration management for portalwatch
//!
//! Settings come from a TOML file, with secrets and a few operational knobs
//! overridable through `PORTALWATCH_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::delivery::DeliveryConfig;
use crate::error::{Error, Result};
use crate::models::{Credentials, EgressRoute, EnvironmentType};
use crate::portal::PortalConfig;

pub const ENV_USERNAME: &str = "PORTALWATCH_USERNAME";
pub const ENV_PASSWORD: &str = "PORTALWATCH_PASSWORD";
pub const ENV_ACCOUNT: &str = "PORTALWATCH_ACCOUNT";
pub const ENV_WEBHOOK_URL: &str = "PORTALWATCH_WEBHOOK_URL";
pub const ENV_INTERVAL_MS: &str = "PORTALWATCH_INTERVAL_MS";
pub const ENV_LOG_LEVEL: &str = "PORTALWATCH_LOG_LEVEL";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["text", "json"];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: ScheduleConfig,

    #[serde(default)]
    pub rotation: RotationConfig,

    #[serde(default)]
    pub portal: PortalConfig,

    #[serde(default)]
    pub credentials: Credentials,

    /// Delivery endpoint; absent disables delivery
    #[serde(default)]
    pub delivery: Option<DeliveryConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Check timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Interval between cycle starts in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Smallest interval accepted
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    600_000
}

fn default_min_interval_ms() -> u64 {
    300_000
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl ScheduleConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Rotation pool contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "EnvironmentType::all")]
    pub environments: Vec<EnvironmentType>,

    /// Custom identity strings; empty uses the built-in per-environment set
    #[serde(default)]
    pub identities: Vec<String>,

    #[serde(default)]
    pub egress_routes: Vec<EgressRoute>,

    /// When false, every cycle connects directly
    #[serde(default = "default_routing_enabled")]
    pub routing_enabled: bool,
}

fn default_routing_enabled() -> bool {
    true
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            environments: EnvironmentType::all(),
            identities: Vec::new(),
            egress_routes: Vec::new(),
            routing_enabled: default_routing_enabled(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;

        let config: Self = toml::from_str(&content)?;
        debug!(path = %path.display(), "Loaded config file");

        Ok(config)
    }

    /// File (or defaults), then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply `PORTALWATCH_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(username) = std::env::var(ENV_USERNAME) {
            self.credentials.username = username;
        }

        if let Ok(password) = std::env::var(ENV_PASSWORD) {
            self.credentials.password = password;
        }

        if let Ok(account) = std::env::var(ENV_ACCOUNT) {
            self.credentials.account = account;
        }

        if let Ok(url) = std::env::var(ENV_WEBHOOK_URL) {
            match self.delivery.as_mut() {
                Some(delivery) => delivery.url = url,
                None => self.delivery = Some(DeliveryConfig::new(url)),
            }
        }

        if let Ok(raw) = std::env::var(ENV_INTERVAL_MS) {
            self.scheduler.interval_ms = raw.trim().parse().map_err(|_| {
                Error::config(format!("{ENV_INTERVAL_MS} must be a whole number, got '{raw}'"))
            })?;
        }

        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.min_interval_ms == 0 {
            return Err(Error::config("scheduler.min_interval_ms must be greater than zero"));
        }

        if self.scheduler.interval_ms < self.scheduler.min_interval_ms {
            return Err(Error::config(format!(
                "check interval {}ms is below the minimum of {}ms",
                self.scheduler.interval_ms, self.scheduler.min_interval_ms
            )));
        }

        if self.rotation.environments.is_empty() {
            return Err(Error::config("rotation.environments must not be empty"));
        }

        if self.rotation.identities.iter().any(|i| i.trim().is_empty()) {
            return Err(Error::config("rotation.identities must not contain blank entries"));
        }

        for route in &self.rotation.egress_routes {
            let parsed = Url::parse(&route.server).map_err(|e| {
                Error::config(format!("egress route '{}' is not a URL: {e}", route.server))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::config(format!(
                    "egress route '{}' must use http or https",
                    route.server
                )));
            }
        }

        self.portal.validate()?;

        if self.credentials.username.is_empty() || self.credentials.password.is_empty() {
            return Err(Error::config(format!(
                "username and password must be set (file or {ENV_USERNAME}/{ENV_PASSWORD})"
            )));
        }

        if let Some(delivery) = &self.delivery {
            delivery
                .validate()
                .map_err(|e| Error::config(e.to_string()))?;
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(Error::config(format!(
                "logging.format '{}' is not one of {}",
                self.logging.format,
                LOG_FORMATS.join(", ")
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::FailureCategory;

    fn valid() -> Config {
        let mut config = Config::default();
        config.portal.base_url = "https://portal.example.com".to_string();
        config.credentials = Credentials::new("user", "secret", "ACC-1");
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.interval(), Duration::from_secs(600));
        assert_eq!(config.scheduler.min_interval(), Duration::from_secs(300));
        assert_eq!(config.rotation.environments, EnvironmentType::all());
        assert!(config.rotation.routing_enabled);
        assert!(config.delivery.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_interval_below_minimum() {
        let mut config = valid();
        config.scheduler.interval_ms = 60_000;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.category(), FailureCategory::Configuration);
    }

    #[test]
    fn test_zero_minimum_interval() {
        let mut config = valid();
        config.scheduler.min_interval_ms = 0;
        config.scheduler.interval_ms = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_interval_ms"));
        assert_eq!(err.category(), FailureCategory::Configuration);
    }

    #[test]
    fn test_invalid_sections() {
        let mut no_envs = valid();
        no_envs.rotation.environments.clear();
        assert!(no_envs.validate().is_err());

        let mut bad_route = valid();
        bad_route.rotation.egress_routes = vec![EgressRoute::new("10.0.0.1:3128")];
        assert!(bad_route.validate().is_err());

        let mut no_password = valid();
        no_password.credentials.password.clear();
        assert!(no_password.validate().is_err());

        let mut bad_delivery = valid();
        bad_delivery.delivery = Some(DeliveryConfig::new("ftp://example.com"));
        assert!(bad_delivery.validate().is_err());

        let mut bad_level = valid();
        bad_level.logging.level = "loud".to_string();
        assert!(bad_level.validate().is_err());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [portal]
            base_url = "https://portal.example.com"

            [credentials]
            username = "user"
            password = "secret"

            [rotation]
            environments = ["firefox", "webkit"]
            egress_routes = [{ server = "http://10.0.0.1:3128", username = "proxy" }]

            [delivery]
            url = "https://hooks.example.com/in"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.rotation.environments,
            vec![EnvironmentType::Firefox, EnvironmentType::Webkit]
        );
        assert_eq!(config.rotation.egress_routes[0].username.as_deref(), Some("proxy"));
        assert_eq!(config.delivery.as_ref().map(|d| d.max_attempts), Some(3));
        assert_eq!(config.credentials.account, "");
        assert!(config.validate().is_ok());
    }
}

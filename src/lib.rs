//! portalwatch - Periodic account checks against a remote portal
//!
//! Signs in to a transaction portal on a fixed interval, extracts new account
//! mutations and pushes them to a webhook, rotating the request fingerprint
//! and egress route between cycles.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`scheduler`] - Check engine, rotation pools and recovery classification
//! - [`portal`] - Session, authentication and extraction collaborators
//! - [`parser`] - Field-level parsing of extracted rows
//! - [`delivery`] - Webhook delivery with retries
//! - [`models`] - Core data structures and types
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use portalwatch::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> portalwatch::Result<()> {
//!     let config = Config::load(None)?;
//!     let portal = Arc::new(HttpPortal::new(config.portal.clone())?);
//!     let parser = Arc::new(MutationParser::new());
//!
//!     let engine = CheckEngine::new(
//!         EngineConfig::from_config(&config),
//!         Collaborators::from_portal(portal, parser),
//!     )?;
//!     let result = engine.execute_check().await;
//!     println!("success: {}", result.success);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod error;
pub mod models;
pub mod parser;
pub mod portal;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::delivery::{DeliveryClient, DeliveryConfig};
    pub use crate::error::{Error, Result};
    pub use crate::models::{Credentials, EgressRoute, EnvironmentType, Mutation, RawRecord};
    pub use crate::parser::{MutationParser, RecordParser};
    pub use crate::portal::{HttpPortal, PortalConfig};
    pub use crate::scheduler::{
        CheckEngine, CheckResult, Collaborators, EngineConfig, FailureCategory, RecoveryAction,
    };
}

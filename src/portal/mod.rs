//! Portal collaborators
//!
//! The check engine drives a remote portal through three narrow interfaces:
//!
//! - [`SessionProvider`]: opens and releases an execution session bound to the
//!   rotation selections of one cycle
//! - [`Authenticator`]: logs in with the configured credentials and logs out
//! - [`Fetcher`]: reads the transaction listing and extracts raw rows
//!
//! [`HttpPortal`] implements all three for form-login portals over plain HTTP.
//! Anything else (a full browser driver, a recorded fixture) plugs in through
//! the same traits.

pub mod headers;
pub mod http;

pub use http::{HttpPortal, PortalConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Credentials, EgressRoute, EnvironmentType, RawRecord};

/// Opaque handle to one execution session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub environment: EnvironmentType,
    pub identity: String,
    pub route: Option<EgressRoute>,
    pub opened_at: DateTime<Utc>,
}

impl Session {
    pub fn new(environment: EnvironmentType, identity: String, route: Option<EgressRoute>) -> Self {
        Self {
            id: Uuid::new_v4(),
            environment,
            identity,
            route,
            opened_at: Utc::now(),
        }
    }
}

/// Opens and releases execution sessions
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn acquire(
        &self,
        environment: EnvironmentType,
        identity: &str,
        route: Option<&EgressRoute>,
    ) -> Result<Session>;

    /// Release a session; must tolerate sessions that never authenticated
    async fn release(&self, session: Session);
}

/// Portal login and logout
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Fails with an authentication error on rejected credentials or an
    /// unexpected post-login state
    async fn authenticate(&self, session: &Session, credentials: &Credentials) -> Result<()>;

    /// Best-effort logout; failures are logged by the implementation
    async fn logout(&self, session: &Session);
}

/// Transaction listing extraction
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_and_extract(&self, session: &Session) -> Result<Vec<RawRecord>>;
}

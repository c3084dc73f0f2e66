//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portalwatch::delivery::{DeliveryError, DeliveryPayload, DeliveryTransport};
use portalwatch::error::{Error, Result};
use portalwatch::models::{Credentials, EgressRoute, EnvironmentType, RawRecord};
use portalwatch::parser::MutationParser;
use portalwatch::portal::{Authenticator, Fetcher, Session, SessionProvider};
use portalwatch::scheduler::{CheckEngine, Collaborators, EngineConfig};

/// Which portal step fails, and how
#[derive(Debug, Clone)]
pub enum Failure {
    Acquire(String),
    Authenticate(String),
    Fetch(String),
}

/// Scripted portal recording every collaborator call
#[derive(Default)]
pub struct FakePortal {
    records: Vec<RawRecord>,
    failure: Option<Failure>,
    fetch_delay: Duration,
    events: Mutex<Vec<String>>,
    sessions: Mutex<Vec<Session>>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, records: Vec<RawRecord>) -> Self {
        self.records = records;
        self
    }

    pub fn failing(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }

    /// Sessions in acquisition order
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().unwrap().clone()
    }

    fn record(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }
}

#[async_trait]
impl SessionProvider for FakePortal {
    async fn acquire(
        &self,
        environment: EnvironmentType,
        identity: &str,
        route: Option<&EgressRoute>,
    ) -> Result<Session> {
        self.record("acquire");
        if let Some(Failure::Acquire(message)) = &self.failure {
            return Err(Error::browser(message.clone()));
        }

        let session = Session::new(environment, identity.to_string(), route.cloned());
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn release(&self, _session: Session) {
        self.record("release");
    }
}

#[async_trait]
impl Authenticator for FakePortal {
    async fn authenticate(&self, _session: &Session, _credentials: &Credentials) -> Result<()> {
        self.record("authenticate");
        if let Some(Failure::Authenticate(message)) = &self.failure {
            return Err(Error::authentication(message.clone()));
        }
        Ok(())
    }

    async fn logout(&self, _session: &Session) {
        self.record("logout");
    }
}

#[async_trait]
impl Fetcher for FakePortal {
    async fn fetch_and_extract(&self, _session: &Session) -> Result<Vec<RawRecord>> {
        self.record("fetch");
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        if let Some(Failure::Fetch(message)) = &self.failure {
            return Err(Error::network(message.clone()));
        }
        Ok(self.records.clone())
    }
}

/// Delivery transport failing the first `failures` attempts
pub struct RecordingTransport {
    failures: u32,
    payloads: Mutex<Vec<serde_json::Value>>,
}

impl RecordingTransport {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, payload: &DeliveryPayload<'_>) -> std::result::Result<(), DeliveryError> {
        let mut payloads = self.payloads.lock().unwrap();
        payloads.push(serde_json::to_value(payload).unwrap());
        if payloads.len() as u32 <= self.failures {
            return Err(DeliveryError::Status {
                status: 500,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

pub fn record(pairs: &[(&str, &str)]) -> RawRecord {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Engine settings with a short interval suitable for paused-time tests
pub fn engine_config() -> EngineConfig {
    EngineConfig::new(Credentials::new("user", "secret", "ACC-1"))
        .with_min_interval(Duration::from_secs(1))
        .with_interval(Duration::from_secs(60))
}

pub fn build_engine(portal: &Arc<FakePortal>, config: EngineConfig) -> CheckEngine {
    CheckEngine::new(
        config,
        Collaborators::from_portal(Arc::clone(portal), Arc::new(MutationParser::new())),
    )
    .unwrap()
}

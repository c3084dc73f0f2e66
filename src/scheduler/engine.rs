//! Check orchestration engine
//!
//! [`CheckEngine`] owns the rotation pools, the recovery classifier and the
//! delivery client, and sequences one check cycle:
//!
//! 1. select environment, identity and egress route
//! 2. acquire a session
//! 3. authenticate
//! 4. fetch and parse
//! 5. deliver (failures are logged, never raised)
//! 6. logout and release the session, whatever happened in 2-5
//! 7. classify a failure of 2-4, possibly marking the egress route failed
//!
//! At most one cycle body runs at a time. [`CheckEngine::execute_check`]
//! rejects a call that arrives while another cycle is in progress.
//!
//! The timer loop runs the first cycle immediately and the following ones at
//! `start + k * interval`. [`CheckEngine::stop`] cancels the pending wait but
//! lets an in-flight cycle finish.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::error::SchedulerError;
use super::recovery::{
    AttemptContext, FailureCategory, FailureClassification, RecoveryAction, RecoveryClassifier,
};
use super::rotation::RotationSet;
use crate::config::Config;
use crate::delivery::{DeliveryClient, DeliveryConfig};
use crate::error::{Error, Result};
use crate::models::{Credentials, EgressRoute, EnvironmentType, Mutation};
use crate::parser::RecordParser;
use crate::portal::{Authenticator, Fetcher, Session, SessionProvider};
use crate::utils::duration_millis;

/// Operation name passed to the classifier for cycle failures
pub const CHECK_OPERATION: &str = "check-cycle";

/// Attempt budget the classifier sees for one cycle
pub const CHECK_MAX_ATTEMPTS: u32 = 3;

/// Default check interval (10 minutes)
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(600_000);

/// Default minimum check interval (5 minutes)
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(300_000);

const RESULT_CHANNEL_CAPACITY: usize = 16;

// ============================================================================
// Cycle Data
// ============================================================================

/// Selections made at the start of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckContext {
    pub environment: EnvironmentType,
    pub identity: String,
    /// `None` when routing is disabled or every route is marked failed
    pub route: Option<EgressRoute>,
    pub started_at: DateTime<Utc>,
}

impl CheckContext {
    fn route_label(&self) -> String {
        self.route
            .as_ref()
            .map(|r| r.label())
            .unwrap_or_else(|| "direct".to_string())
    }
}

/// Outcome of one call to [`CheckEngine::execute_check`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Recovery action chosen for a failed cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<RecoveryAction>,
}

impl CheckResult {
    fn succeeded(mutation_count: usize) -> Self {
        Self {
            success: true,
            timestamp: Utc::now(),
            mutation_count: Some(mutation_count),
            error: None,
            action: None,
        }
    }

    fn failed(error: String, action: Option<RecoveryAction>) -> Self {
        Self {
            success: false,
            timestamp: Utc::now(),
            mutation_count: None,
            error: Some(error),
            action,
        }
    }

    /// Exit code the process should terminate with, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self.action {
            Some(RecoveryAction::Fatal { exit_code }) => Some(exit_code),
            _ => None,
        }
    }
}

/// A failed cycle with its classification
#[derive(Debug)]
struct CycleFailure {
    error: Error,
    classification: FailureClassification,
    action: RecoveryAction,
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Settings the engine is constructed from
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub interval: Duration,
    pub min_interval: Duration,
    pub credentials: Credentials,
    /// Delivery endpoint; `None` disables delivery
    pub delivery: Option<DeliveryConfig>,
    pub environments: Vec<EnvironmentType>,
    /// Custom identities; empty selects per-environment defaults
    pub identities: Vec<String>,
    /// Egress routes; empty means direct connections
    pub routes: Vec<EgressRoute>,
}

impl EngineConfig {
    /// Defaults with the given credentials
    pub fn new(credentials: Credentials) -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            min_interval: DEFAULT_MIN_INTERVAL,
            credentials,
            delivery: None,
            environments: EnvironmentType::all(),
            identities: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let routes = if config.rotation.routing_enabled {
            config.rotation.egress_routes.clone()
        } else {
            Vec::new()
        };

        Self {
            interval: config.scheduler.interval(),
            min_interval: config.scheduler.min_interval(),
            credentials: config.credentials.clone(),
            delivery: config.delivery.clone(),
            environments: config.rotation.environments.clone(),
            identities: config.rotation.identities.clone(),
            routes,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_environments(mut self, environments: Vec<EnvironmentType>) -> Self {
        self.environments = environments;
        self
    }

    pub fn with_identities(mut self, identities: Vec<String>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_routes(mut self, routes: Vec<EgressRoute>) -> Self {
        self.routes = routes;
        self
    }
}

/// External collaborators a cycle calls into
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionProvider>,
    pub authenticator: Arc<dyn Authenticator>,
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn RecordParser>,
}

impl Collaborators {
    /// All three portal roles served by one implementation
    pub fn from_portal<P>(portal: Arc<P>, parser: Arc<dyn RecordParser>) -> Self
    where
        P: SessionProvider + Authenticator + Fetcher + 'static,
    {
        Self {
            sessions: portal.clone(),
            authenticator: portal.clone(),
            fetcher: portal,
            parser,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Point-in-time engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No timer pending and no cycle executing
    Idle,
    /// Timer loop active, waiting for the next cycle
    Scheduled,
    /// A cycle body is executing
    Running,
}

/// Clears the in-progress flag on every exit path
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct TimerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Periodic check scheduler
pub struct CheckEngine {
    interval: Duration,
    credentials: Credentials,
    rotation: Mutex<RotationSet>,
    classifier: RecoveryClassifier,
    delivery: Option<DeliveryClient>,
    collaborators: Collaborators,
    in_progress: AtomicBool,
    timer: StdMutex<Option<TimerHandle>>,
    results: broadcast::Sender<CheckResult>,
}

impl CheckEngine {
    /// Validate settings and build the pools and delivery client
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        if config.min_interval.is_zero() {
            return Err(
                SchedulerError::invalid_config("min_interval", "must be greater than zero").into(),
            );
        }
        if config.interval < config.min_interval {
            return Err(SchedulerError::invalid_interval(
                duration_millis(config.interval),
                duration_millis(config.min_interval),
            )
            .into());
        }

        let rotation = RotationSet::new(config.environments, config.identities, config.routes)?;

        let delivery = config
            .delivery
            .as_ref()
            .map(DeliveryClient::from_config)
            .transpose()?;

        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);

        info!(
            interval_ms = duration_millis(config.interval),
            environments = rotation.environments.size(),
            custom_identities = rotation.identities.is_custom(),
            routes = rotation.routes.size(),
            delivery = delivery.is_some(),
            "Check engine configured"
        );

        Ok(Self {
            interval: config.interval,
            credentials: config.credentials,
            rotation: Mutex::new(rotation),
            classifier: RecoveryClassifier::new(),
            delivery,
            collaborators,
            in_progress: AtomicBool::new(false),
            timer: StdMutex::new(None),
            results,
        })
    }

    /// Replace the delivery client
    pub fn with_delivery_client(mut self, client: DeliveryClient) -> Self {
        self.delivery = Some(client);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Receive every completed cycle result
    pub fn subscribe(&self) -> broadcast::Receiver<CheckResult> {
        self.results.subscribe()
    }

    fn timer(&self) -> std::sync::MutexGuard<'_, Option<TimerHandle>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timer_pending(&self) -> bool {
        self.timer()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Start the timer loop; the first cycle runs immediately
    ///
    /// No-op while [`is_running`](Self::is_running), including while a cycle
    /// from a stopped loop is still draining.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self.timer();

        let pending = timer.as_ref().is_some_and(|handle| !handle.task.is_finished());
        let draining = self.in_progress.load(Ordering::Acquire);
        if pending || draining {
            info!(
                timer_pending = pending,
                cycle_in_progress = draining,
                "Check engine already running"
            );
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move { engine.run_loop(stop_rx).await });

        *timer = Some(TimerHandle { stop_tx, task });
        info!(
            interval_ms = duration_millis(self.interval),
            "Check engine started"
        );
    }

    /// Cancel the pending timer; an in-flight cycle runs to completion
    pub fn stop(&self) {
        match self.timer().take() {
            Some(handle) => {
                // The loop may already have exited
                let _ = handle.stop_tx.send(true);
                info!("Check engine stopped");
            }
            None => debug!("Check engine not running"),
        }
    }

    /// True while a timer is pending or a cycle is executing
    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire) || self.timer_pending()
    }

    pub fn state(&self) -> EngineState {
        if self.in_progress.load(Ordering::Acquire) {
            EngineState::Running
        } else if self.timer_pending() {
            EngineState::Scheduled
        } else {
            EngineState::Idle
        }
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let mut deadline = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = sleep_until(deadline) => {}
            }

            deadline += self.interval;
            self.execute_check().await;

            if *stop_rx.borrow() {
                break;
            }
        }

        debug!("Check loop exited");
    }

    /// Run one cycle unless another is in progress
    pub async fn execute_check(&self) -> CheckResult {
        let Some(_guard) = CycleGuard::acquire(&self.in_progress) else {
            warn!("Check already in progress, rejecting overlapping cycle");
            return CheckResult::failed(SchedulerError::CheckInProgress.to_string(), None);
        };

        let started = Instant::now();

        let result = match self.perform_check().await {
            Ok(count) => {
                info!(
                    mutations = count,
                    duration_ms = duration_millis(started.elapsed()),
                    "Check cycle completed"
                );
                CheckResult::succeeded(count)
            }
            Err(failure) => {
                error!(
                    error = %failure.error,
                    category = %failure.classification.category,
                    recoverable = failure.classification.recoverable,
                    action = %failure.action,
                    duration_ms = duration_millis(started.elapsed()),
                    "Check cycle failed"
                );
                CheckResult::failed(failure.error.to_string(), Some(failure.action))
            }
        };

        // No subscribers is fine
        let _ = self.results.send(result.clone());
        result
    }

    /// Draw the next set of cycle selections
    pub async fn select_context(&self) -> CheckContext {
        self.rotation.lock().await.select()
    }

    /// Whether `route` is currently excluded from selection
    pub async fn is_route_failed(&self, route: &EgressRoute) -> bool {
        self.rotation.lock().await.routes.is_failed(route)
    }

    /// Number of egress routes still eligible for selection
    pub async fn available_routes(&self) -> usize {
        self.rotation.lock().await.routes.available_count()
    }

    /// Return every failed egress route to service
    pub async fn clear_route_failures(&self) {
        self.rotation.lock().await.routes.clear_failures();
        info!("Cleared egress route failures");
    }

    async fn perform_check(&self) -> std::result::Result<usize, CycleFailure> {
        let context = self.select_context().await;

        info!(
            environment = %context.environment,
            route = %context.route_label(),
            "Starting check cycle"
        );

        match self.run_session(&context).await {
            Ok(count) => Ok(count),
            Err(error) => Err(self.handle_failure(&context, error).await),
        }
    }

    async fn run_session(&self, context: &CheckContext) -> Result<usize> {
        let session = self
            .collaborators
            .sessions
            .acquire(context.environment, &context.identity, context.route.as_ref())
            .await?;

        let outcome = self.run_authenticated(&session).await;

        // Cleanup runs exactly once whether or not the body failed
        self.collaborators.authenticator.logout(&session).await;
        self.collaborators.sessions.release(session).await;

        outcome
    }

    async fn run_authenticated(&self, session: &Session) -> Result<usize> {
        self.collaborators
            .authenticator
            .authenticate(session, &self.credentials)
            .await?;

        let raw = self.collaborators.fetcher.fetch_and_extract(session).await?;
        let parsed = self.collaborators.parser.parse_all(&raw);

        if parsed.failed > 0 {
            warn!(
                extracted = raw.len(),
                failed = parsed.failed,
                "Some records could not be parsed"
            );
        }

        self.deliver(&parsed.mutations).await;

        Ok(parsed.mutations.len())
    }

    async fn deliver(&self, mutations: &[Mutation]) {
        let Some(client) = &self.delivery else {
            debug!("No delivery endpoint configured");
            return;
        };

        if mutations.is_empty() {
            debug!("No mutations to deliver");
            return;
        }

        if let Err(e) = client.send(mutations, &self.credentials.account).await {
            let attempts = client.max_attempts();
            let (classification, action) = self
                .classifier
                .classify(&e.to_string(), &AttemptContext::new("delivery", attempts, attempts));

            error!(
                error = %e,
                category = %classification.category,
                action = %action,
                "Delivery failed, continuing with cleanup"
            );
        }
    }

    async fn handle_failure(&self, context: &CheckContext, error: Error) -> CycleFailure {
        let attempt = AttemptContext::new(CHECK_OPERATION, 1, CHECK_MAX_ATTEMPTS);
        let (classification, action) = self.classifier.classify(&error.to_string(), &attempt);

        if action.is_retry() && classification.category == FailureCategory::Network {
            if let Some(route) = &context.route {
                self.rotation.lock().await.routes.mark_failed(route);
                warn!(route = %route.label(), "Egress route marked failed");
            }
        }

        CycleFailure {
            error,
            classification,
            action,
        }
    }
}

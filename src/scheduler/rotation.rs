//! Round-robin rotation pools for per-cycle execution parameters
//!
//! Three pools feed every check cycle:
//! - environment types, a plain [`RotationPool`]
//! - identity strings, an [`IdentityPool`] that falls back to per-environment
//!   defaults when no custom strings are configured
//! - egress routes, a [`FailureAwarePool`] that skips routes marked failed
//!
//! Selection is deterministic: call `k` on a pool of `n` items returns
//! `items[k % n]`. The pools are plain values; the engine owns one set and
//! serializes access to it.

use chrono::Utc;
use std::collections::HashSet;
use tracing::debug;

use super::engine::CheckContext;
use super::error::{SchedulerError, SchedulerResult};
use crate::models::{EgressRoute, EnvironmentType};

// ============================================================================
// Rotation Pool
// ============================================================================

/// Cyclic selector over a fixed, non-empty list
#[derive(Debug, Clone)]
pub struct RotationPool<T> {
    items: Vec<T>,
    cursor: usize,
}

impl<T: Clone> RotationPool<T> {
    /// Create a pool; fails if `items` is empty
    pub fn new(items: Vec<T>) -> SchedulerResult<Self> {
        Self::named("rotation", items)
    }

    /// Create a pool, naming it in the error if `items` is empty
    pub fn named(name: &str, items: Vec<T>) -> SchedulerResult<Self> {
        if items.is_empty() {
            return Err(SchedulerError::empty_pool(name));
        }
        Ok(Self { items, cursor: 0 })
    }

    /// Return the item under the cursor and advance
    pub fn next(&mut self) -> T {
        let item = self.items[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.items.len();
        item
    }

    /// Rewind to the first item without touching the order
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }
}

// ============================================================================
// Identity Pool
// ============================================================================

/// Default identity string per environment type
const DEFAULT_IDENTITIES: &[(EnvironmentType, &str)] = &[
    (
        EnvironmentType::Chromium,
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ),
    (
        EnvironmentType::Firefox,
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    ),
    (
        EnvironmentType::Webkit,
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    ),
];

/// Default identity string for an environment type
pub fn default_identity(env: EnvironmentType) -> &'static str {
    DEFAULT_IDENTITIES
        .iter()
        .find(|(candidate, _)| *candidate == env)
        .map(|(_, identity)| *identity)
        .unwrap_or(DEFAULT_IDENTITIES[0].1)
}

/// Default identity string for an environment name
///
/// Unknown names get the first environment type's default.
pub fn default_identity_for_name(name: &str) -> &'static str {
    match EnvironmentType::from_id(name) {
        Some(env) => default_identity(env),
        None => DEFAULT_IDENTITIES[0].1,
    }
}

/// Check whether an identity string's engine markers fit an environment type
pub fn identity_matches(identity: &str, env: EnvironmentType) -> bool {
    let is_chromium = identity.contains("Chrome/") || identity.contains("Chromium/");
    match env {
        EnvironmentType::Chromium => is_chromium,
        EnvironmentType::Firefox => identity.contains("Firefox/") && identity.contains("Gecko/"),
        EnvironmentType::Webkit => {
            identity.contains("AppleWebKit/") && identity.contains("Safari/") && !is_chromium
        }
    }
}

/// Identity-string pool
///
/// With custom strings it rotates through them regardless of environment.
/// Without any, it hands out the default for the requested environment.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    custom: Option<RotationPool<String>>,
}

impl IdentityPool {
    pub fn new(identities: Vec<String>) -> Self {
        let custom = if identities.is_empty() {
            None
        } else {
            RotationPool::named("identity", identities).ok()
        };
        Self { custom }
    }

    /// Next identity string for a cycle running on `env`
    pub fn next(&mut self, env: EnvironmentType) -> String {
        match &mut self.custom {
            Some(pool) => pool.next(),
            None => default_identity(env).to_string(),
        }
    }

    /// Whether custom strings were configured
    pub fn is_custom(&self) -> bool {
        self.custom.is_some()
    }

    pub fn reset(&mut self) {
        if let Some(pool) = &mut self.custom {
            pool.reset();
        }
    }

    /// Number of custom strings, or the number of defaults in default mode
    pub fn size(&self) -> usize {
        match &self.custom {
            Some(pool) => pool.size(),
            None => DEFAULT_IDENTITIES.len(),
        }
    }
}

// ============================================================================
// Failure-Aware Pool
// ============================================================================

/// Identity of a pool item for exclusion purposes
pub trait PoolKey {
    fn pool_key(&self) -> String;
}

impl PoolKey for EgressRoute {
    /// Address plus auth principal; the password does not participate
    fn pool_key(&self) -> String {
        match &self.username {
            Some(user) => format!("{}|{}", self.server, user),
            None => self.server.clone(),
        }
    }
}

impl PoolKey for String {
    fn pool_key(&self) -> String {
        self.clone()
    }
}

/// Rotation pool that skips items marked failed
///
/// An empty pool is valid and never yields an item. Once every item is marked
/// failed, `next()` yields nothing until [`FailureAwarePool::clear_failures`].
#[derive(Debug, Clone)]
pub struct FailureAwarePool<T> {
    items: Vec<T>,
    cursor: usize,
    failed: HashSet<String>,
}

impl<T: Clone + PoolKey> FailureAwarePool<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: 0,
            failed: HashSet::new(),
        }
    }

    /// First non-failed item at or after the cursor, scanning one full lap
    pub fn next(&mut self) -> Option<T> {
        let len = self.items.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            let item = &self.items[index];
            if !self.failed.contains(&item.pool_key()) {
                self.cursor = (index + 1) % len;
                return Some(item.clone());
            }
        }
        None
    }

    /// Exclude an item from selection; idempotent
    pub fn mark_failed(&mut self, item: &T) {
        let key = item.pool_key();
        if self.failed.insert(key.clone()) {
            debug!(item = %key, available = self.available_count(), "Excluded pool item");
        }
    }

    pub fn is_failed(&self, item: &T) -> bool {
        self.failed.contains(&item.pool_key())
    }

    pub fn clear_failures(&mut self) {
        self.failed.clear();
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Items not currently excluded
    pub fn available_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| !self.failed.contains(&item.pool_key()))
            .count()
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }
}

// ============================================================================
// Rotation Set
// ============================================================================

/// The three pools one engine draws from
#[derive(Debug, Clone)]
pub struct RotationSet {
    pub environments: RotationPool<EnvironmentType>,
    pub identities: IdentityPool,
    pub routes: FailureAwarePool<EgressRoute>,
}

impl RotationSet {
    pub fn new(
        environments: Vec<EnvironmentType>,
        identities: Vec<String>,
        routes: Vec<EgressRoute>,
    ) -> SchedulerResult<Self> {
        Ok(Self {
            environments: RotationPool::named("environment", environments)?,
            identities: IdentityPool::new(identities),
            routes: FailureAwarePool::new(routes),
        })
    }

    /// Draw one selection from each pool for a new cycle
    pub fn select(&mut self) -> CheckContext {
        let environment = self.environments.next();
        let identity = self.identities.next(environment);
        let route = self.routes.next();
        let route_label = route
            .as_ref()
            .map(|r| r.label())
            .unwrap_or_else(|| "direct".to_string());

        debug!(
            environment = %environment,
            route = %route_label,
            available_routes = self.routes.available_count(),
            "Selected cycle parameters"
        );

        CheckContext {
            environment,
            identity,
            route,
            started_at: Utc::now(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

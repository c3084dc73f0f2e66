//! Check scheduling and failure recovery
//!
//! This module drives the periodic portal check: it picks the parameters of
//! each cycle from rotating pools, runs the cycle against the portal
//! collaborators, and decides what a failure means for the next one.
//!
//! # Features
//!
//! - **Round-Robin Rotation**: environment type, identity string and egress
//!   route change from cycle to cycle
//! - **Failure-Aware Routing**: routes that failed on network errors are
//!   skipped until cleared
//! - **Overlap Guard**: at most one cycle executes at any time
//! - **Guaranteed Cleanup**: every acquired session is logged out and released
//! - **Recovery Classification**: failures map to retry, skip, fallback or
//!   fatal actions
//! - **Result Broadcasting**: completed cycles are published on a tokio channel
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       CheckEngine                        │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │ RotationSet │  │  Recovery    │  │ DeliveryClient │  │
//! │  │ env / id /  │  │  Classifier  │  │ retry+backoff  │  │
//! │  │ route pools │  │              │  │                │  │
//! │  └──────┬──────┘  └──────▲───────┘  └───────▲────────┘  │
//! │         │ select         │ classify         │ send      │
//! │         ▼                │                  │           │
//! │   acquire ─▶ authenticate ─▶ fetch ─▶ parse ─▶ deliver   │
//! │         └──────────── logout + release ◀──────┘         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`rotation`] - Round-robin and failure-aware pools
//! - [`recovery`] - Failure categorization and recovery actions
//! - [`engine`] - Timer loop, overlap guard and cycle sequencing
//! - [`error`] - Scheduler error types
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use portalwatch::scheduler::{CheckEngine, Collaborators, EngineConfig};
//!
//! let engine = Arc::new(CheckEngine::new(
//!     EngineConfig::from_config(&config),
//!     Collaborators::from_portal(portal, parser),
//! )?);
//!
//! let mut results = engine.subscribe();
//! engine.start();
//!
//! while let Ok(result) = results.recv().await {
//!     println!("cycle success={} mutations={:?}", result.success, result.mutation_count);
//! }
//! ```
//!
//! ## Classifying a Failure
//!
//! ```
//! use portalwatch::scheduler::{AttemptContext, RecoveryAction, RecoveryClassifier};
//!
//! let classifier = RecoveryClassifier::new();
//! let (classification, action) = classifier.classify(
//!     "Authentication failed: bad password",
//!     &AttemptContext::new("check-cycle", 1, 3),
//! );
//! assert!(classification.recoverable);
//! assert_eq!(action, RecoveryAction::Retry { delay_seconds: 30 });
//! ```

pub mod engine;
pub mod error;
pub mod recovery;
pub mod rotation;

pub use engine::{
    CheckContext, CheckEngine, CheckResult, Collaborators, EngineConfig, EngineState,
};
pub use error::{SchedulerError, SchedulerResult};
pub use recovery::{
    AttemptContext, FailureCategory, FailureClassification, RecoveryAction, RecoveryClassifier,
};
pub use rotation::{FailureAwarePool, IdentityPool, PoolKey, RotationPool, RotationSet};

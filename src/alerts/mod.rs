//! # Alert Pipeline
//!
//! Ingestion of scored events, the alert state machine, severity banding and the visibility
//! resolver.

pub mod ingest;
pub mod lifecycle;
pub mod severity;
pub mod visibility;

pub use ingest::{EmbeddedScore, EventScorer, IngestionPipeline, RetryPolicy, ScoredEvent};
pub use lifecycle::LifecycleEngine;
pub use severity::SeverityThresholds;
pub use visibility::{AlertScope, can_see, scope_for};

//! Ingestion pipeline: scored events in, alerts out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rand::{Rng, thread_rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::alerts::lifecycle::LifecycleEngine;
use crate::alerts::severity::{SeverityThresholds, validate_score};
use crate::config::RetryPolicyConfig;
use crate::error::AlertError;
use crate::models::AlertRef;
use crate::repositories::NewAlert;

/// A transaction event as delivered by the upstream scoring stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScoredEvent {
    /// Stable id of the originating event; the idempotency key
    pub source_event_id: String,
    pub tenant_scope: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Precomputed risk score, read by [`EmbeddedScore`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScoringError {
    #[error("event carries no score")]
    MissingScore,
    #[error("scorer failed: {0}")]
    Failed(String),
}

/// Scoring collaborator: `Score(event) -> [0, 1]`.
#[async_trait]
pub trait EventScorer: Send + Sync {
    async fn score(&self, event: &ScoredEvent) -> Result<f64, ScoringError>;
}

/// Uses the score the event already carries.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedScore;

#[async_trait]
impl EventScorer for EmbeddedScore {
    async fn score(&self, event: &ScoredEvent) -> Result<f64, ScoringError> {
        event.score.ok_or(ScoringError::MissingScore)
    }
}

/// Exponential backoff with jitter for `StoreUnavailable`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryPolicyConfig::default())
    }
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(config: &RetryPolicyConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            max: Duration::from_millis(config.max_ms),
            max_attempts: config.max_attempts.max(1),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped, plus jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;
        let backoff = (base_ms * 2_f64.powi(attempt.min(30) as i32)).min(max_ms);

        let spread = self.jitter_factor * backoff;
        let jitter = if spread > 0.0 {
            thread_rng().gen_range(0.0..spread)
        } else {
            0.0
        };

        Duration::from_millis((backoff + jitter).min(max_ms) as u64)
    }
}

pub struct IngestionPipeline {
    lifecycle: Arc<LifecycleEngine>,
    thresholds: SeverityThresholds,
    retry: RetryPolicy,
}

impl IngestionPipeline {
    pub fn new(
        lifecycle: Arc<LifecycleEngine>,
        thresholds: SeverityThresholds,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            lifecycle,
            thresholds,
            retry,
        }
    }

    /// Materializes an alert for `event` when `score` reaches the alert floor.
    ///
    /// Returns `None` below the floor. Repeated ingestion of the same source event returns the
    /// existing alert without writing.
    #[instrument(skip_all, fields(source_event_id = %event.source_event_id, tenant_scope = %event.tenant_scope, score = score))]
    pub async fn ingest(
        &self,
        event: &ScoredEvent,
        score: f64,
    ) -> Result<Option<AlertRef>, AlertError> {
        let source_event_id = event.source_event_id.trim();
        if source_event_id.is_empty() {
            return Err(AlertError::InvalidInput(
                "source_event_id must not be empty".to_string(),
            ));
        }
        validate_score(score)?;

        let Some(severity) = self.thresholds.classify(score)? else {
            counter!("alerts_ingest_skipped_total").increment(1);
            debug!(
                floor = self.thresholds.alert_floor(),
                "Score below alert floor, no alert created"
            );
            return Ok(None);
        };

        let (alert, created) = self
            .lifecycle
            .create(NewAlert {
                source_event_id: source_event_id.to_string(),
                tenant_scope: event.tenant_scope,
                owner_id: event.owner_id.clone(),
                severity,
                score,
            })
            .await?;

        if created {
            counter!("alerts_ingested_total").increment(1);
        } else {
            debug!(alert_id = %alert.id, "Event already materialized");
        }

        Ok(Some(AlertRef::new(&alert, created)))
    }

    /// Scores `event` with `scorer`, then ingests it. Scorer failures are `InvalidInput`.
    pub async fn score_and_ingest(
        &self,
        scorer: &dyn EventScorer,
        event: &ScoredEvent,
    ) -> Result<Option<AlertRef>, AlertError> {
        let score = scorer
            .score(event)
            .await
            .map_err(|err| AlertError::InvalidInput(err.to_string()))?;
        self.ingest(event, score).await
    }

    /// [`Self::ingest`] with retries on `StoreUnavailable`; other errors return at once.
    pub async fn ingest_with_retry(
        &self,
        event: &ScoredEvent,
        score: f64,
    ) -> Result<Option<AlertRef>, AlertError> {
        let mut attempt = 0;
        loop {
            match self.ingest(event, score).await {
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        source_event_id = %event.source_event_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Ingest failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Scores with `scorer`, then ingests with retries.
    pub async fn score_and_ingest_with_retry(
        &self,
        scorer: &dyn EventScorer,
        event: &ScoredEvent,
    ) -> Result<Option<AlertRef>, AlertError> {
        let score = scorer
            .score(event)
            .await
            .map_err(|err| AlertError::InvalidInput(err.to_string()))?;
        self.ingest_with_retry(event, score).await
    }
}

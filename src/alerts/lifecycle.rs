//! Alert lifecycle engine: the only writer of status, assignee and version.

use std::sync::Arc;

use metrics::counter;
use tokio::task::JoinError;
use tracing::{Instrument, info, instrument};
use uuid::Uuid;

use crate::alerts::visibility::{can_see, scope_for};
use crate::error::{AlertError, StoreError};
use crate::models::{Alert, AlertStatus, ViewerIdentity};
use crate::realtime::{AlertSnapshot, Delta, DeltaPublisher};
use crate::repositories::{AlertFilter, AlertStore, CasOutcome, NewAlert};

/// Allowed `(from, to)` edges. Terminal states have none; self-loops are not edges.
const EDGES: &[(AlertStatus, AlertStatus)] = &[
    (AlertStatus::Open, AlertStatus::Investigating),
    (AlertStatus::Open, AlertStatus::Resolved),
    (AlertStatus::Open, AlertStatus::FalsePositive),
    (AlertStatus::Investigating, AlertStatus::Resolved),
    (AlertStatus::Investigating, AlertStatus::FalsePositive),
    (AlertStatus::Investigating, AlertStatus::Open),
];

pub fn is_allowed(from: AlertStatus, to: AlertStatus) -> bool {
    EDGES.contains(&(from, to))
}

pub struct LifecycleEngine {
    store: Arc<dyn AlertStore>,
    publisher: Arc<dyn DeltaPublisher>,
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn AlertStore>, publisher: Arc<dyn DeltaPublisher>) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    /// Persists a new alert unless one exists for the source event.
    ///
    /// Publishes `created` only when this call inserted the row.
    #[instrument(skip_all, fields(source_event_id = %new_alert.source_event_id))]
    pub async fn create(&self, new_alert: NewAlert) -> Result<(Alert, bool), AlertError> {
        let store = Arc::clone(&self.store);
        let publisher = Arc::clone(&self.publisher);

        // Insert and announce together; a dropped caller cannot split them.
        let (alert, created) = tokio::spawn(
            async move {
                let (alert, created) = store.insert_if_absent(new_alert).await?;
                if created {
                    publisher.publish(Delta::Created(alert.clone()));
                }
                Ok::<_, StoreError>((alert, created))
            }
            .in_current_span(),
        )
        .await
        .map_err(write_task_failed)??;

        if created {
            info!(
                alert_id = %alert.id,
                tenant_scope = %alert.tenant_scope,
                severity = ?alert.severity,
                "Alert created"
            );
        }

        Ok((alert, created))
    }

    /// Moves an alert to `target` if the caller holds the current version.
    ///
    /// Checks run in order: existence, visibility, version, edge. A stale version never
    /// overwrites; the error carries the authoritative alert.
    #[instrument(skip_all, fields(alert_id = %alert_id, expected_version = expected_version, target = %target, viewer_id = %viewer.viewer_id))]
    pub async fn transition(
        &self,
        alert_id: Uuid,
        expected_version: i64,
        target: AlertStatus,
        viewer: &ViewerIdentity,
    ) -> Result<Alert, AlertError> {
        let current = self
            .store
            .get(alert_id)
            .await?
            .ok_or(AlertError::NotFound(alert_id))?;

        if !can_see(&current, viewer) {
            return Err(AlertError::Forbidden);
        }

        if current.version != expected_version {
            return Err(conflict(expected_version, current));
        }

        if !is_allowed(current.status, target) {
            return Err(AlertError::InvalidTransition {
                from: current.status,
                to: target,
            });
        }

        let next = next_state(&current, target, viewer);

        let store = Arc::clone(&self.store);
        let publisher = Arc::clone(&self.publisher);
        let write = next.clone();

        // The write runs to completion and is published even if this call is dropped.
        let outcome = tokio::spawn(
            async move {
                let outcome = store.compare_and_set(expected_version, &write).await?;
                if outcome == CasOutcome::Applied {
                    publisher.publish(Delta::Updated(write));
                }
                Ok::<_, StoreError>(outcome)
            }
            .in_current_span(),
        )
        .await
        .map_err(write_task_failed)??;

        match outcome {
            CasOutcome::Applied => {
                counter!("alerts_transitions_total", "to" => target.as_str()).increment(1);
                info!(
                    from = %current.status,
                    version = next.version,
                    assignee = ?next.assignee,
                    "Alert transitioned"
                );
                Ok(next)
            }
            CasOutcome::Stale(current) => Err(conflict(expected_version, current)),
            CasOutcome::Missing => Err(AlertError::NotFound(alert_id)),
        }
    }

    /// Single alert lookup through the visibility resolver.
    pub async fn get(&self, alert_id: Uuid, viewer: &ViewerIdentity) -> Result<Alert, AlertError> {
        let alert = self
            .store
            .get(alert_id)
            .await?
            .ok_or(AlertError::NotFound(alert_id))?;

        if !can_see(&alert, viewer) {
            return Err(AlertError::Forbidden);
        }
        Ok(alert)
    }

    /// Pull query: every alert the viewer may see, optionally newer than `since_version`.
    pub async fn list(
        &self,
        viewer: &ViewerIdentity,
        since_version: Option<i64>,
        status: Option<AlertStatus>,
    ) -> Result<AlertSnapshot, AlertError> {
        let Some(scope) = scope_for(viewer) else {
            return Ok(AlertSnapshot::default());
        };

        let filter = AlertFilter {
            scope,
            since_version,
            status,
        };
        let alerts = self
            .store
            .list(&filter)
            .await?
            .into_iter()
            .filter(|alert| can_see(alert, viewer))
            .collect();

        Ok(AlertSnapshot::from_alerts(alerts))
    }
}

fn conflict(expected: i64, current: Alert) -> AlertError {
    counter!("alerts_transition_conflicts_total").increment(1);
    AlertError::Conflict {
        expected,
        current: Box::new(current),
    }
}

fn write_task_failed(error: JoinError) -> AlertError {
    tracing::error!(%error, "Alert write task failed");
    AlertError::StoreUnavailable(format!("write task failed: {}", error))
}

fn next_state(current: &Alert, target: AlertStatus, viewer: &ViewerIdentity) -> Alert {
    let mut next = current.clone();
    next.status = target;
    match target {
        AlertStatus::Investigating if next.assignee.is_none() => {
            next.assignee = Some(viewer.viewer_id.clone());
        }
        AlertStatus::Open => next.assignee = None,
        _ => {}
    }
    next.version = current.version + 1;
    next.updated_at = chrono::Utc::now().into();
    next
}

//! # Alert Store
//!
//! Durable source of truth for alerts. The [`AlertStore`] trait is the boundary the lifecycle
//! engine and ingestion pipeline depend on; [`SeaOrmAlertStore`] implements it over SeaORM.
//! Reads are bounded by the store timeout. Writes are not: once issued they run to completion on
//! their own task, so a committed write is never reported as a failure. Waiting for a pooled
//! connection is still bounded by the pool's acquire timeout. Raw `DbErr`s never cross the
//! boundary.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::alerts::visibility::AlertScope;
use crate::error::{StoreError, is_unique_violation};
use crate::models::alert::{ActiveModel as AlertActiveModel, Column, Entity as AlertEntity};
use crate::models::{Alert, AlertStatus, Severity};

/// Fields supplied by ingestion when materializing an alert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub source_event_id: String,
    pub tenant_scope: Uuid,
    pub owner_id: Option<String>,
    pub severity: Severity,
    pub score: f64,
}

/// Pull query filter. `scope` comes from the visibility resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertFilter {
    pub scope: AlertScope,
    /// Only alerts whose version is strictly greater
    pub since_version: Option<i64>,
    pub status: Option<AlertStatus>,
}

impl AlertFilter {
    pub fn new(scope: AlertScope) -> Self {
        Self {
            scope,
            since_version: None,
            status: None,
        }
    }
}

/// Result of a compare-and-set write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    Applied,
    /// The stored version differed; carries the authoritative row
    Stale(Alert),
    Missing,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Inserts unless an alert for the same source event exists.
    ///
    /// Returns the stored alert and whether this call created it.
    async fn insert_if_absent(&self, alert: NewAlert) -> Result<(Alert, bool), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Alert>, StoreError>;

    async fn find_by_source_event(
        &self,
        source_event_id: &str,
    ) -> Result<Option<Alert>, StoreError>;

    /// Writes `next` only if the stored version still equals `expected_version`.
    async fn compare_and_set(
        &self,
        expected_version: i64,
        next: &Alert,
    ) -> Result<CasOutcome, StoreError>;

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError>;
}

/// SeaORM-backed alert store.
#[derive(Debug, Clone)]
pub struct SeaOrmAlertStore {
    db: DatabaseConnection,
    timeout: Duration,
}

impl SeaOrmAlertStore {
    pub fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, DbErr>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                tracing::warn!(operation, timeout_ms, "Alert store operation timed out");
                Err(StoreError::Timeout { timeout_ms })
            }
        }
    }

    /// Runs a write on its own task and waits for it without a deadline.
    ///
    /// Dropping the caller does not cancel the statement.
    async fn run_to_completion<T, F>(
        &self,
        operation: &'static str,
        fut: F,
    ) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, DbErr>> + Send + 'static,
    {
        match tokio::spawn(fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(join_error) => {
                tracing::error!(operation, error = %join_error, "Alert store write task failed");
                Err(StoreError::Unavailable(format!(
                    "{} write task failed: {}",
                    operation, join_error
                )))
            }
        }
    }
}

#[async_trait]
impl AlertStore for SeaOrmAlertStore {
    async fn insert_if_absent(&self, alert: NewAlert) -> Result<(Alert, bool), StoreError> {
        let existing = self
            .bounded(
                "insert_if_absent",
                AlertEntity::find()
                    .filter(Column::SourceEventId.eq(alert.source_event_id.as_str()))
                    .one(&self.db),
            )
            .await?;
        if let Some(existing) = existing {
            return Ok((existing.into(), false));
        }

        let db = self.db.clone();
        let (model, created) = self
            .run_to_completion("insert_if_absent", async move {
                let now = chrono::Utc::now().into();
                let source_event_id = alert.source_event_id.clone();
                let row = AlertActiveModel {
                    id: Set(Uuid::new_v4()),
                    source_event_id: Set(alert.source_event_id),
                    tenant_scope: Set(alert.tenant_scope),
                    owner_id: Set(alert.owner_id),
                    severity: Set(alert.severity),
                    score: Set(alert.score),
                    status: Set(AlertStatus::Open),
                    assignee: Set(None),
                    version: Set(1),
                    created_at: Set(now),
                    updated_at: Set(now),
                };

                match row.insert(&db).await {
                    Ok(inserted) => Ok((inserted, true)),
                    // Lost the race against a concurrent ingest of the same event
                    Err(err) if is_unique_violation(&err) => {
                        let existing = AlertEntity::find()
                            .filter(Column::SourceEventId.eq(source_event_id.as_str()))
                            .one(&db)
                            .await?
                            .ok_or_else(|| {
                                DbErr::RecordNotFound(format!(
                                    "alert for source event {} vanished after unique violation",
                                    source_event_id
                                ))
                            })?;
                        Ok((existing, false))
                    }
                    Err(err) => Err(err),
                }
            })
            .await?;

        Ok((model.into(), created))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
        let model = self
            .bounded("get", AlertEntity::find_by_id(id).one(&self.db))
            .await?;
        Ok(model.map(Alert::from))
    }

    async fn find_by_source_event(
        &self,
        source_event_id: &str,
    ) -> Result<Option<Alert>, StoreError> {
        let model = self
            .bounded(
                "find_by_source_event",
                AlertEntity::find()
                    .filter(Column::SourceEventId.eq(source_event_id))
                    .one(&self.db),
            )
            .await?;
        Ok(model.map(Alert::from))
    }

    async fn compare_and_set(
        &self,
        expected_version: i64,
        next: &Alert,
    ) -> Result<CasOutcome, StoreError> {
        debug_assert_eq!(next.version, expected_version + 1);

        let db = self.db.clone();
        let next = next.clone();
        let current = self
            .run_to_completion("compare_and_set", async move {
                let result = AlertEntity::update_many()
                    .col_expr(Column::Status, Expr::value(next.status))
                    .col_expr(Column::Assignee, Expr::value(next.assignee.clone()))
                    .col_expr(Column::Version, Expr::value(expected_version + 1))
                    .col_expr(Column::UpdatedAt, Expr::value(next.updated_at))
                    .filter(Column::Id.eq(next.id))
                    .filter(Column::Version.eq(expected_version))
                    .exec(&db)
                    .await?;

                if result.rows_affected == 1 {
                    return Ok(None);
                }
                AlertEntity::find_by_id(next.id).one(&db).await.map(Some)
            })
            .await?;

        Ok(match current {
            None => CasOutcome::Applied,
            Some(Some(model)) => CasOutcome::Stale(model.into()),
            Some(None) => CasOutcome::Missing,
        })
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        let mut query = AlertEntity::find();

        query = match &filter.scope {
            AlertScope::All => query,
            AlertScope::Tenant(tenant) => query.filter(Column::TenantScope.eq(*tenant)),
            AlertScope::Owner {
                tenant_scope,
                owner_id,
            } => query
                .filter(Column::TenantScope.eq(*tenant_scope))
                .filter(Column::OwnerId.eq(owner_id.as_str())),
        };

        if let Some(since) = filter.since_version {
            query = query.filter(Column::Version.gt(since));
        }

        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status));
        }

        let models = self
            .bounded(
                "list",
                query
                    .order_by_asc(Column::CreatedAt)
                    .order_by_asc(Column::Id)
                    .all(&self.db),
            )
            .await?;

        Ok(models.into_iter().map(Alert::from).collect())
    }
}

#[cfg(test)]
pub(crate) async fn sqlite_store() -> SeaOrmAlertStore {
    use migration::{Migrator, MigratorTrait};

    let db = sea_orm::Database::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    Migrator::up(&db, None).await.expect("migrations");
    SeaOrmAlertStore::new(db, Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_alert(source: &str, tenant: Uuid, owner: Option<&str>) -> NewAlert {
        NewAlert {
            source_event_id: source.to_string(),
            tenant_scope: tenant,
            owner_id: owner.map(str::to_string),
            severity: Severity::High,
            score: 0.9,
        }
    }

    #[tokio::test]
    async fn compare_and_set_is_not_cut_short_by_the_store_timeout() {
        let patient = sqlite_store().await;
        let hasty = SeaOrmAlertStore::new(patient.db.clone(), Duration::ZERO);
        let tenant = Uuid::new_v4();

        for i in 0..50 {
            let (alert, _) = patient
                .insert_if_absent(new_alert(&format!("evt-cas-{i}"), tenant, None))
                .await
                .unwrap();
            let mut next = alert.clone();
            next.status = AlertStatus::Investigating;
            next.version = 2;

            let outcome = hasty.compare_and_set(1, &next).await;

            assert_eq!(outcome, Ok(CasOutcome::Applied));
            let stored = patient.get(alert.id).await.unwrap().unwrap();
            assert_eq!(stored.version, 2);
            assert_eq!(stored.status, AlertStatus::Investigating);
        }
    }

    #[tokio::test]
    async fn insert_outcome_matches_what_was_stored_under_a_tight_timeout() {
        let patient = sqlite_store().await;
        let hasty = SeaOrmAlertStore::new(patient.db.clone(), Duration::ZERO);
        let tenant = Uuid::new_v4();

        for i in 0..50 {
            let source = format!("evt-ins-{i}");
            let result = hasty.insert_if_absent(new_alert(&source, tenant, None)).await;
            let stored = patient.find_by_source_event(&source).await.unwrap();

            match result {
                Ok((alert, created)) => {
                    assert!(created);
                    assert_eq!(stored.map(|a| a.id), Some(alert.id));
                }
                Err(StoreError::Timeout { .. }) => assert!(stored.is_none()),
                Err(other) => panic!("unexpected store error {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn insert_if_absent_returns_existing_row_on_repeat() {
        let store = sqlite_store().await;
        let tenant = Uuid::new_v4();

        let (first, created) = store
            .insert_if_absent(new_alert("evt-1", tenant, None))
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.version, 1);
        assert_eq!(first.status, AlertStatus::Open);

        let (second, created) = store
            .insert_if_absent(new_alert("evt-1", tenant, None))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);

        let found = store.find_by_source_event("evt-1").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_versions() {
        let store = sqlite_store().await;
        let (alert, _) = store
            .insert_if_absent(new_alert("evt-2", Uuid::new_v4(), None))
            .await
            .unwrap();

        let mut next = alert.clone();
        next.status = AlertStatus::Investigating;
        next.assignee = Some("bob".to_string());
        next.version = 2;

        assert_eq!(
            store.compare_and_set(1, &next).await.unwrap(),
            CasOutcome::Applied
        );

        let stored = store.get(alert.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.status, AlertStatus::Investigating);
        assert_eq!(stored.assignee.as_deref(), Some("bob"));

        // Same expected version again: the row moved on
        match store.compare_and_set(1, &next).await.unwrap() {
            CasOutcome::Stale(current) => assert_eq!(current.version, 2),
            other => panic!("expected stale outcome, got {:?}", other),
        }

        let mut ghost = next.clone();
        ghost.id = Uuid::new_v4();
        assert_eq!(
            store.compare_and_set(1, &ghost).await.unwrap(),
            CasOutcome::Missing
        );
    }

    #[tokio::test]
    async fn list_applies_scope_and_version_filters() {
        let store = sqlite_store().await;
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        store
            .insert_if_absent(new_alert("a-1", tenant_a, Some("acct-1")))
            .await
            .unwrap();
        let (a2, _) = store
            .insert_if_absent(new_alert("a-2", tenant_a, Some("acct-2")))
            .await
            .unwrap();
        store
            .insert_if_absent(new_alert("b-1", tenant_b, None))
            .await
            .unwrap();

        let all = store.list(&AlertFilter::new(AlertScope::All)).await.unwrap();
        assert_eq!(all.len(), 3);

        let tenant_only = store
            .list(&AlertFilter::new(AlertScope::Tenant(tenant_a)))
            .await
            .unwrap();
        assert_eq!(tenant_only.len(), 2);

        let owner_only = store
            .list(&AlertFilter::new(AlertScope::Owner {
                tenant_scope: tenant_a,
                owner_id: "acct-1".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(owner_only.len(), 1);
        assert_eq!(owner_only[0].source_event_id, "a-1");

        let mut bumped = a2.clone();
        bumped.status = AlertStatus::Resolved;
        bumped.version = 2;
        store.compare_and_set(1, &bumped).await.unwrap();

        let newer = store
            .list(&AlertFilter {
                since_version: Some(1),
                ..AlertFilter::new(AlertScope::All)
            })
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].id, a2.id);

        let resolved = store
            .list(&AlertFilter {
                status: Some(AlertStatus::Resolved),
                ..AlertFilter::new(AlertScope::Tenant(tenant_a))
            })
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
    }
}

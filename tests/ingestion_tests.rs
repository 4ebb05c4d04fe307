//! Idempotent ingestion, sequential and concurrent.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use alerts::alerts::{AlertScope, IngestionPipeline, RetryPolicy, SeverityThresholds};
use alerts::config::RetryPolicyConfig;
use alerts::error::AlertError;
use alerts::models::{Severity, ViewerIdentity};
use alerts::realtime::{ConnectionRegistry, DeltaKind};
use alerts::repositories::{AlertFilter, AlertStore};
use test_utils::{
    assert_quiet, engines_with_store_timeout, next_envelope, scored_event, test_config,
    test_state,
};
use uuid::Uuid;

#[tokio::test]
async fn repeated_ingest_creates_exactly_one_alert() {
    let tenant = Uuid::new_v4();
    let state = test_state(test_config(tenant)).await.unwrap();
    let event = scored_event("txn-42", tenant, None);

    let first = state.pipeline.ingest(&event, 0.72).await.unwrap().unwrap();
    let second = state.pipeline.ingest(&event, 0.72).await.unwrap().unwrap();
    let third = state.pipeline.ingest(&event, 0.72).await.unwrap().unwrap();

    assert!(first.created);
    assert!(!second.created && !third.created);
    assert_eq!(first.id, second.id);
    assert_eq!(first.id, third.id);
    assert_eq!(first.severity, Severity::Medium);

    let stored = state
        .lifecycle
        .store()
        .list(&AlertFilter::new(AlertScope::All))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].version, 1);
}

#[tokio::test]
async fn concurrent_ingest_of_one_event_yields_one_alert() {
    let tenant = Uuid::new_v4();
    let state = test_state(test_config(tenant)).await.unwrap();
    let event = scored_event("txn-race", tenant, None);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = Arc::clone(&state.pipeline);
        let event = event.clone();
        handles.push(tokio::spawn(async move { pipeline.ingest(&event, 0.9).await }));
    }

    let mut ids = Vec::new();
    let mut created = 0;
    for handle in handles {
        let alert = handle.await.unwrap().unwrap().unwrap();
        if alert.created {
            created += 1;
        }
        ids.push(alert.id);
    }

    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn creation_is_pushed_once_and_duplicates_stay_silent() {
    let tenant = Uuid::new_v4();
    let state = test_state(test_config(tenant)).await.unwrap();
    let mut receiver = state
        .registry
        .register(
            Uuid::new_v4(),
            alerts::models::ViewerIdentity::analyst("bob", tenant),
        )
        .unwrap();
    let event = scored_event("txn-push", tenant, None);

    state.pipeline.ingest(&event, 0.96).await.unwrap();
    let envelope = next_envelope(&mut receiver).await;
    assert_eq!(envelope.alert.severity, Severity::Critical);

    state.pipeline.ingest(&event, 0.96).await.unwrap();
    assert_quiet(&mut receiver).await;
}

#[tokio::test]
async fn below_floor_and_invalid_scores() {
    let tenant = Uuid::new_v4();
    let state = test_state(test_config(tenant)).await.unwrap();

    let skipped = state
        .pipeline
        .ingest(&scored_event("txn-low", tenant, None), 0.1)
        .await
        .unwrap();
    assert!(skipped.is_none());

    let err = state
        .pipeline
        .ingest(&scored_event("txn-nan", tenant, None), f64::NAN)
        .await
        .unwrap_err();
    assert!(matches!(err, AlertError::InvalidInput(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn ingest_retried_after_store_timeouts_announces_exactly_once() {
    let registry = Arc::new(ConnectionRegistry::new(256));
    let (hasty, patient) = engines_with_store_timeout(Arc::clone(&registry), Duration::ZERO)
        .await
        .unwrap();
    let tenant = Uuid::new_v4();
    let mut queue = registry
        .register(Uuid::new_v4(), ViewerIdentity::analyst("bob", tenant))
        .unwrap();

    let retry = RetryPolicy::from(&RetryPolicyConfig {
        base_ms: 1,
        max_ms: 5,
        max_attempts: 3,
        jitter_factor: 0.0,
    });
    let hasty_pipeline =
        IngestionPipeline::new(hasty, SeverityThresholds::default(), retry.clone());
    let patient_pipeline =
        IngestionPipeline::new(Arc::clone(&patient), SeverityThresholds::default(), retry);

    for i in 0..25 {
        let event = scored_event(&format!("txn-timeout-{i}"), tenant, None);

        let first = hasty_pipeline.ingest_with_retry(&event, 0.9).await;
        match &first {
            Ok(Some(alert)) => assert!(alert.created),
            Err(AlertError::StoreUnavailable(_)) => {
                let stored = patient
                    .store()
                    .find_by_source_event(&event.source_event_id)
                    .await
                    .unwrap();
                assert!(stored.is_none());
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let second = patient_pipeline
            .ingest_with_retry(&event, 0.9)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.created, first.is_err());

        let announced = next_envelope(&mut queue).await;
        assert_eq!(announced.kind, DeltaKind::Created);
        assert_eq!(announced.alert.id, second.id);
    }
    assert_quiet(&mut queue).await;
}

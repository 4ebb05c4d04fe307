//! Client replica convergence against live pushes, including duplicates, reordering and
//! disconnect followed by a snapshot resync.

mod test_utils;

use std::sync::Arc;

use alerts::models::{AlertStatus, ViewerIdentity};
use alerts::realtime::{ApplyOutcome, ClientFrame, ConnectionRegistry, Envelope, SyncState};
use alerts::repositories::NewAlert;
use test_utils::{engine_with_registry, next_envelope};
use uuid::Uuid;

fn new_alert(source: &str, tenant: Uuid) -> NewAlert {
    NewAlert {
        source_event_id: source.to_string(),
        tenant_scope: tenant,
        owner_id: None,
        severity: alerts::models::Severity::Low,
        score: 0.6,
    }
}

#[tokio::test]
async fn duplicated_and_reordered_pushes_converge_to_server_state() {
    let registry = Arc::new(ConnectionRegistry::new(32));
    let (engine, _) = engine_with_registry(Arc::clone(&registry)).await.unwrap();
    let tenant = Uuid::new_v4();
    let analyst = ViewerIdentity::analyst("bob", tenant);
    let mut queue = registry.register(Uuid::new_v4(), analyst.clone()).unwrap();

    let mut replica = SyncState::new();
    replica.apply_snapshot(engine.list(&analyst, None, None).await.unwrap());
    assert!(!replica.needs_resync());

    let (alert, _) = engine.create(new_alert("evt-a", tenant)).await.unwrap();
    engine
        .transition(alert.id, 1, AlertStatus::Investigating, &analyst)
        .await
        .unwrap();
    engine
        .transition(alert.id, 2, AlertStatus::Resolved, &analyst)
        .await
        .unwrap();

    let mut pushed: Vec<Arc<Envelope>> = Vec::new();
    for _ in 0..3 {
        pushed.push(next_envelope(&mut queue).await);
    }
    let versions: Vec<i64> = pushed.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);

    // Deliver out of order with a duplicate.
    assert_eq!(replica.apply(&pushed[2]), ApplyOutcome::Applied);
    assert_eq!(replica.apply(&pushed[0]), ApplyOutcome::Duplicate);
    assert_eq!(replica.apply(&pushed[1]), ApplyOutcome::Duplicate);
    assert_eq!(replica.apply(&pushed[2]), ApplyOutcome::Duplicate);

    let server = engine.get(alert.id, &analyst).await.unwrap();
    let held = replica.alert(alert.id).unwrap();
    assert_eq!(held.version, server.version);
    assert_eq!(held.status, server.status);
    assert_eq!(replica.last_acked_version(tenant), Some(3));
    assert_eq!(
        replica.ack_for(tenant),
        Some(ClientFrame::Ack {
            tenant_scope: tenant,
            version: 3
        })
    );
}

#[tokio::test]
async fn changes_missed_while_disconnected_arrive_through_resync() {
    let registry = Arc::new(ConnectionRegistry::new(32));
    let (engine, _) = engine_with_registry(Arc::clone(&registry)).await.unwrap();
    let tenant = Uuid::new_v4();
    let analyst = ViewerIdentity::analyst("bob", tenant);

    let session = Uuid::new_v4();
    let mut queue = registry.register(session, analyst.clone()).unwrap();
    let mut replica = SyncState::new();
    replica.apply_snapshot(engine.list(&analyst, None, None).await.unwrap());

    let (first, _) = engine.create(new_alert("evt-1", tenant)).await.unwrap();
    replica.apply(&*next_envelope(&mut queue).await);

    registry.unregister(session);
    drop(queue);
    replica.mark_disconnected();
    assert!(replica.needs_resync());

    engine
        .transition(first.id, 1, AlertStatus::FalsePositive, &analyst)
        .await
        .unwrap();
    let (second, _) = engine.create(new_alert("evt-2", tenant)).await.unwrap();

    // Reconnect: register before taking the snapshot so nothing falls between them.
    let mut queue = registry.register(Uuid::new_v4(), analyst.clone()).unwrap();
    replica.apply_snapshot(engine.list(&analyst, None, None).await.unwrap());
    assert!(!replica.needs_resync());

    assert_eq!(
        replica.alert(first.id).map(|a| a.status),
        Some(AlertStatus::FalsePositive)
    );
    assert!(replica.alert(second.id).is_some());
    assert_eq!(replica.alerts().len(), 2);

    engine
        .transition(second.id, 1, AlertStatus::Investigating, &analyst)
        .await
        .unwrap();
    let update = next_envelope(&mut queue).await;
    assert_eq!(replica.apply(&update), ApplyOutcome::Applied);

    let server = engine.list(&analyst, None, None).await.unwrap();
    for alert in &server.alerts {
        let held = replica.alert(alert.id).unwrap();
        assert_eq!((held.version, held.status), (alert.version, alert.status));
    }
}

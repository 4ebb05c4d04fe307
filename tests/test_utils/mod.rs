//! Shared helpers for integration tests.
//!
//! Sets up an in-memory SQLite database with migrations applied and wires the full
//! application state on top of it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use alerts::alerts::{LifecycleEngine, ScoredEvent};
use alerts::config::{AppConfig, ViewerTokenConfig};
use alerts::realtime::{ConnectionRegistry, Dispatcher, Envelope};
use alerts::repositories::SeaOrmAlertStore;
use alerts::server::AppState;
use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const INGEST_TOKEN: &str = "ingest-test-token";
pub const ADMIN_TOKEN: &str = "admin-test-token";
pub const ANALYST_TOKEN: &str = "analyst-test-token";
pub const CLIENT_TOKEN: &str = "client-test-token";
pub const CLIENT_OWNER: &str = "acct-1";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Test-profile configuration with one viewer of each role scoped to `tenant`.
pub fn test_config(tenant: Uuid) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        ingest_tokens: vec![INGEST_TOKEN.to_string()],
        viewer_tokens: vec![
            ViewerTokenConfig::parse(&format!("{}|root|admin", ADMIN_TOKEN)).unwrap(),
            ViewerTokenConfig::parse(&format!("{}|bob|analyst|{}", ANALYST_TOKEN, tenant))
                .unwrap(),
            ViewerTokenConfig::parse(&format!(
                "{}|carol|client|{}|{}",
                CLIENT_TOKEN, tenant, CLIENT_OWNER
            ))
            .unwrap(),
        ],
        ..Default::default()
    }
}

/// Full application state over a fresh database.
pub async fn test_state(config: AppConfig) -> Result<AppState> {
    let db = setup_test_db().await?;
    Ok(AppState::build(config, db)?)
}

/// Lifecycle engine wired to a dispatcher over `registry`.
pub async fn engine_with_registry(
    registry: Arc<ConnectionRegistry>,
) -> Result<(Arc<LifecycleEngine>, Dispatcher)> {
    let db = setup_test_db().await?;
    let store = Arc::new(SeaOrmAlertStore::new(db, Duration::from_secs(5)));
    let dispatcher = Dispatcher::new(registry, &Default::default());
    let engine = Arc::new(LifecycleEngine::new(store, Arc::new(dispatcher.clone())));
    Ok((engine, dispatcher))
}

/// Two engines over one database publishing to one dispatcher: the first uses a store with
/// `store_timeout`, the second a store that effectively never times out.
pub async fn engines_with_store_timeout(
    registry: Arc<ConnectionRegistry>,
    store_timeout: Duration,
) -> Result<(Arc<LifecycleEngine>, Arc<LifecycleEngine>)> {
    let db = setup_test_db().await?;
    let dispatcher = Arc::new(Dispatcher::new(registry, &Default::default()));
    let patient = LifecycleEngine::new(
        Arc::new(SeaOrmAlertStore::new(db.clone(), Duration::from_secs(5))),
        dispatcher.clone(),
    );
    let hasty = LifecycleEngine::new(
        Arc::new(SeaOrmAlertStore::new(db, store_timeout)),
        dispatcher,
    );
    Ok((Arc::new(hasty), Arc::new(patient)))
}

pub fn scored_event(source_event_id: &str, tenant: Uuid, owner: Option<&str>) -> ScoredEvent {
    ScoredEvent {
        source_event_id: source_event_id.to_string(),
        tenant_scope: tenant,
        owner_id: owner.map(str::to_string),
        score: Some(0.9),
    }
}

/// Waits for the next envelope on a session queue.
pub async fn next_envelope(receiver: &mut mpsc::Receiver<Arc<Envelope>>) -> Arc<Envelope> {
    tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("envelope within timeout")
        .expect("session queue open")
}

/// Asserts nothing arrives on a session queue for a short while.
pub async fn assert_quiet(receiver: &mut mpsc::Receiver<Arc<Envelope>>) {
    let outcome = tokio::time::timeout(Duration::from_millis(100), receiver.recv()).await;
    assert!(outcome.is_err(), "unexpected envelope: {:?}", outcome);
}

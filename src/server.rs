//! # Server Configuration
//!
//! Application state wiring, router construction and the serve loop.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::alerts::{
    EmbeddedScore, EventScorer, IngestionPipeline, LifecycleEngine, RetryPolicy,
    SeverityThresholds,
};
use crate::auth::{ViewerDirectory, ingest_auth_middleware, viewer_auth_middleware};
use crate::config::{AppConfig, ConfigError};
use crate::handlers;
use crate::realtime::{ConnectionRegistry, Dispatcher};
use crate::repositories::{AlertStore, SeaOrmAlertStore};
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub lifecycle: Arc<LifecycleEngine>,
    pub pipeline: Arc<IngestionPipeline>,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Dispatcher,
    pub scorer: Arc<dyn EventScorer>,
    pub directory: Arc<ViewerDirectory>,
    /// Fired on shutdown; live sessions close when it does
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires the store, lifecycle engine, dispatcher and ingestion pipeline from `config`.
    pub fn build(config: AppConfig, db: DatabaseConnection) -> Result<Self, ConfigError> {
        let thresholds = SeverityThresholds::try_from(&config.severity)?;
        config.dispatch.validate()?;

        let store: Arc<dyn AlertStore> =
            Arc::new(SeaOrmAlertStore::new(db.clone(), config.store_timeout()));
        let registry = Arc::new(ConnectionRegistry::new(config.dispatch.session_buffer));
        let dispatcher = Dispatcher::new(Arc::clone(&registry), &config.dispatch);
        let lifecycle = Arc::new(LifecycleEngine::new(store, Arc::new(dispatcher.clone())));
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&lifecycle),
            thresholds,
            RetryPolicy::from(&config.ingest_retry),
        ));
        let directory = Arc::new(ViewerDirectory::from_config(&config.viewer_tokens));

        Ok(Self {
            config: Arc::new(config),
            db,
            lifecycle,
            pipeline,
            registry,
            dispatcher,
            scorer: Arc::new(EmbeddedScore),
            directory,
            shutdown: CancellationToken::new(),
        })
    }

    /// Replaces the scoring collaborator.
    pub fn with_scorer(mut self, scorer: Arc<dyn EventScorer>) -> Self {
        self.scorer = scorer;
        self
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let viewer_routes = Router::new()
        .route("/alerts", get(handlers::alerts::list_alerts))
        .route("/alerts/stream", get(handlers::stream::alert_stream))
        .route("/alerts/{id}", get(handlers::alerts::get_alert))
        .route(
            "/alerts/{id}/transition",
            post(handlers::alerts::transition_alert),
        )
        .route("/sessions", get(handlers::sessions::list_sessions))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            viewer_auth_middleware,
        ));

    let ingest_routes = Router::new()
        .route("/events", post(handlers::events::ingest_event))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            ingest_auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .merge(viewer_routes)
        .merge(ingest_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serves until `shutdown` fires, then closes live sessions.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.bind_addr()?;
    let shutdown = state.shutdown.clone();
    let registry = Arc::clone(&state.registry);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Alerts service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    registry.close_all();
    tracing::info!("Alerts service stopped");
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::readyz,
        crate::handlers::events::ingest_event,
        crate::handlers::alerts::list_alerts,
        crate::handlers::alerts::get_alert,
        crate::handlers::alerts::transition_alert,
        crate::handlers::stream::alert_stream,
        crate::handlers::sessions::list_sessions,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::Alert,
            crate::models::AlertRef,
            crate::models::AlertStatus,
            crate::models::Severity,
            crate::models::Role,
            crate::alerts::ScoredEvent,
            crate::handlers::ReadinessStatus,
            crate::handlers::alerts::TransitionRequest,
            crate::handlers::events::IngestResponse,
            crate::handlers::events::IngestOutcome,
            crate::realtime::AlertSnapshot,
            crate::realtime::Envelope,
            crate::realtime::DeltaKind,
            crate::realtime::SessionInfo,
            crate::error::ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Fraud Alerts API",
        description = "Alert lifecycle and real-time delivery for scored transactions",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

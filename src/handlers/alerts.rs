//! # Alert Handlers
//!
//! Pull query and transition endpoints. Every result passes through the visibility resolver.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::Viewer;
use crate::error::ApiError;
use crate::models::{Alert, AlertStatus};
use crate::realtime::AlertSnapshot;
use crate::server::AppState;

/// Query parameters for listing alerts
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListAlertsParams {
    /// Only alerts whose version is greater than this
    #[param(style = Simple, example = 3)]
    pub since_version: Option<i64>,

    /// Filter by status
    #[param(style = Simple, example = "open")]
    pub status: Option<AlertStatus>,
}

/// Path parameters for alert operations
#[derive(Debug, Deserialize, IntoParams)]
pub struct AlertPath {
    pub id: Uuid,
}

/// Transition request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransitionRequest {
    /// Version the caller last observed
    pub expected_version: i64,
    pub target_status: AlertStatus,
}

/// List alerts visible to the caller with per-tenant watermarks
#[utoipa::path(
    get,
    path = "/alerts",
    security(("bearer_auth" = [])),
    params(ListAlertsParams),
    responses(
        (status = 200, description = "Visible alerts", body = AlertSnapshot),
        (status = 401, description = "Missing or invalid token", body = ApiError),
        (status = 503, description = "Alert store unavailable", body = ApiError)
    ),
    tag = "alerts"
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Query(params): Query<ListAlertsParams>,
) -> Result<Json<AlertSnapshot>, ApiError> {
    debug!(
        viewer_id = %viewer.viewer_id,
        since_version = ?params.since_version,
        status = ?params.status,
        "Listing alerts"
    );

    let snapshot = state
        .lifecycle
        .list(&viewer, params.since_version, params.status)
        .await?;

    Ok(Json(snapshot))
}

/// Get a single alert
#[utoipa::path(
    get,
    path = "/alerts/{id}",
    security(("bearer_auth" = [])),
    params(AlertPath),
    responses(
        (status = 200, description = "Alert", body = Alert),
        (status = 403, description = "Not visible to the caller", body = ApiError),
        (status = 404, description = "Alert not found", body = ApiError)
    ),
    tag = "alerts"
)]
pub async fn get_alert(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(path): Path<AlertPath>,
) -> Result<Json<Alert>, ApiError> {
    let alert = state.lifecycle.get(path.id, &viewer).await?;
    Ok(Json(alert))
}

/// Transition an alert's status with optimistic concurrency
#[utoipa::path(
    post,
    path = "/alerts/{id}/transition",
    security(("bearer_auth" = [])),
    params(AlertPath),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Alert transitioned", body = Alert),
        (status = 400, description = "Malformed request", body = ApiError),
        (status = 403, description = "Not visible to the caller", body = ApiError),
        (status = 404, description = "Alert not found", body = ApiError),
        (status = 409, description = "Version conflict; details carry the current alert", body = ApiError),
        (status = 422, description = "Transition not allowed", body = ApiError),
        (status = 503, description = "Alert store unavailable", body = ApiError)
    ),
    tag = "alerts"
)]
pub async fn transition_alert(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(path): Path<AlertPath>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> Result<Json<Alert>, ApiError> {
    let Json(request) = payload?;

    let alert = state
        .lifecycle
        .transition(
            path.id,
            request.expected_version,
            request.target_status,
            &viewer,
        )
        .await?;

    Ok(Json(alert))
}

//! # Event Ingestion Handler

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::alerts::ScoredEvent;
use crate::auth::IngestAuth;
use crate::error::ApiError;
use crate::models::AlertRef;
use crate::server::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Created,
    Existing,
    BelowThreshold,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IngestResponse {
    pub outcome: IngestOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertRef>,
}

/// Ingest a scored event
#[utoipa::path(
    post,
    path = "/events",
    security(("bearer_auth" = [])),
    request_body = ScoredEvent,
    responses(
        (status = 201, description = "Alert created", body = IngestResponse),
        (status = 200, description = "Event already materialized", body = IngestResponse),
        (status = 202, description = "Score below the alert floor", body = IngestResponse),
        (status = 400, description = "Invalid event or score", body = ApiError),
        (status = 401, description = "Missing or invalid ingest token", body = ApiError),
        (status = 503, description = "Alert store unavailable", body = ApiError)
    ),
    tag = "events"
)]
pub async fn ingest_event(
    State(state): State<AppState>,
    _ingest: IngestAuth,
    payload: Result<Json<ScoredEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let Json(event) = payload?;

    let result = state
        .pipeline
        .score_and_ingest_with_retry(state.scorer.as_ref(), &event)
        .await?;

    let (status, outcome) = match &result {
        Some(alert) if alert.created => (StatusCode::CREATED, IngestOutcome::Created),
        Some(_) => (StatusCode::OK, IngestOutcome::Existing),
        None => (StatusCode::ACCEPTED, IngestOutcome::BelowThreshold),
    };

    Ok((
        status,
        Json(IngestResponse {
            outcome,
            alert: result,
        }),
    ))
}

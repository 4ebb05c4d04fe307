//! # Session Listing Handler

use axum::extract::State;
use axum::response::Json;

use crate::auth::Viewer;
use crate::error::{ApiError, forbidden};
use crate::models::Role;
use crate::realtime::SessionInfo;
use crate::server::AppState;

/// List live push sessions (admin only)
#[utoipa::path(
    get,
    path = "/sessions",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Live sessions", body = [SessionInfo]),
        (status = 403, description = "Admin role required", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
) -> Result<Json<Vec<SessionInfo>>, ApiError> {
    if viewer.role != Role::Admin {
        return Err(forbidden(Some("Admin access required")));
    }
    Ok(Json(state.registry.describe()))
}

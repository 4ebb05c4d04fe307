//! # Authentication
//!
//! Default identity collaborator: a static bearer-token directory loaded from configuration.
//! Viewer requests resolve to a [`ViewerIdentity`]; ingestion requests carry an
//! [`IngestAuth`] marker. Token comparison is constant time.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Query, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::config::{AppConfig, ViewerTokenConfig};
use crate::error::{ApiError, unauthorized};
use crate::models::ViewerIdentity;
use crate::server::AppState;

/// Authenticated viewer attached to the request by [`viewer_auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer(pub ViewerIdentity);

/// Marker for requests authenticated with an ingest token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestAuth;

/// Maps bearer tokens to viewer identities.
#[derive(Debug, Default)]
pub struct ViewerDirectory {
    entries: Vec<(String, ViewerIdentity)>,
}

impl ViewerDirectory {
    pub fn from_config(tokens: &[ViewerTokenConfig]) -> Self {
        Self {
            entries: tokens
                .iter()
                .map(|entry| {
                    (
                        entry.token.clone(),
                        ViewerIdentity {
                            viewer_id: entry.viewer_id.clone(),
                            role: entry.role,
                            tenant_scope: entry.tenant_scope,
                            owner_id: entry.owner_id.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Resolves a token. Every entry is compared so timing does not reveal which one matched.
    pub fn resolve(&self, token: &str) -> Option<ViewerIdentity> {
        let mut found = None;
        for (candidate, identity) in &self.entries {
            let matches: bool = candidate.as_bytes().ct_eq(token.as_bytes()).into();
            if matches && found.is_none() {
                found = Some(identity.clone());
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Resolves the viewer from `Authorization: Bearer` or, for browser WebSocket clients, the
/// `access_token` query parameter.
pub async fn viewer_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = match bearer_token(request.headers())? {
        Some(token) => token,
        None => Query::<TokenQuery>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(query)| query.access_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?,
    };

    let viewer = state
        .directory
        .resolve(&token)
        .ok_or_else(|| unauthorized(Some("Invalid bearer token")))?;

    tracing::debug!(
        viewer_id = %viewer.viewer_id,
        role = viewer.role.as_str(),
        "Authenticated viewer request"
    );

    request.extensions_mut().insert(Viewer(viewer));
    Ok(next.run(request).await)
}

/// Accepts only configured ingest tokens.
pub async fn ingest_auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())?
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?;

    let is_valid = config
        .ingest_tokens
        .iter()
        .fold(false, |valid, configured| {
            let matches: bool = configured.as_bytes().ct_eq(token.as_bytes()).into();
            valid | matches
        });

    if !is_valid {
        return Err(unauthorized(Some("Invalid ingest token")));
    }

    request.extensions_mut().insert(IngestAuth);
    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let header = value
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .map(|token| Some(token.trim().to_string()))
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Viewer>()
            .cloned()
            .ok_or_else(|| unauthorized(Some("Viewer authentication required")))
    }
}

impl<S> FromRequestParts<S> for IngestAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<IngestAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Ingest authentication required")))
    }
}

//! Viewer identity as resolved by the identity collaborator.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Role attached to an authenticated viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Analyst,
    Client,
    /// Anything the identity collaborator could not map; never grants visibility.
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "analyst" => Role::Analyst,
            "client" => Role::Client,
            _ => Role::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Analyst => "analyst",
            Role::Client => "client",
            Role::Unknown => "unknown",
        }
    }
}

/// Authenticated principal bound to a request or a live session.
///
/// Resolved once at authorization time and fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ViewerIdentity {
    pub viewer_id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_scope: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl ViewerIdentity {
    pub fn admin(viewer_id: impl Into<String>) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            role: Role::Admin,
            tenant_scope: None,
            owner_id: None,
        }
    }

    pub fn analyst(viewer_id: impl Into<String>, tenant_scope: Uuid) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            role: Role::Analyst,
            tenant_scope: Some(tenant_scope),
            owner_id: None,
        }
    }

    pub fn client(
        viewer_id: impl Into<String>,
        tenant_scope: Uuid,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            role: Role::Client,
            tenant_scope: Some(tenant_scope),
            owner_id: Some(owner_id.into()),
        }
    }
}

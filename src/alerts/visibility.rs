//! Visibility resolver: the single place that decides who may see an alert.

use uuid::Uuid;

use crate::models::{Alert, Role, ViewerIdentity};

/// Returns whether `viewer` is authorized to see `alert`.
///
/// Pure and deny-by-default: unknown roles and roles missing the scope they depend on see
/// nothing.
pub fn can_see(alert: &Alert, viewer: &ViewerIdentity) -> bool {
    match viewer.role {
        Role::Admin => true,
        Role::Analyst => viewer.tenant_scope == Some(alert.tenant_scope),
        Role::Client => {
            let same_tenant = viewer.tenant_scope == Some(alert.tenant_scope);
            let same_owner = match (&alert.owner_id, &viewer.owner_id) {
                (Some(alert_owner), Some(viewer_owner)) => alert_owner == viewer_owner,
                _ => false,
            };
            same_tenant && same_owner
        }
        Role::Unknown => false,
    }
}

/// Store-level prefilter derived from a viewer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertScope {
    All,
    Tenant(Uuid),
    Owner { tenant_scope: Uuid, owner_id: String },
}

/// Narrowest store query that can contain every alert the viewer may see.
///
/// `None` means the viewer can see nothing and the store need not be queried. Rows returned
/// under a scope are still passed through [`can_see`].
pub fn scope_for(viewer: &ViewerIdentity) -> Option<AlertScope> {
    match (viewer.role, viewer.tenant_scope, &viewer.owner_id) {
        (Role::Admin, _, _) => Some(AlertScope::All),
        (Role::Analyst, Some(tenant), _) => Some(AlertScope::Tenant(tenant)),
        (Role::Client, Some(tenant), Some(owner)) => Some(AlertScope::Owner {
            tenant_scope: tenant,
            owner_id: owner.clone(),
        }),
        _ => None,
    }
}

impl AlertScope {
    /// Whether any alert of `tenant_scope` can fall under this scope.
    pub fn covers_tenant(&self, tenant_scope: Uuid) -> bool {
        match self {
            AlertScope::All => true,
            AlertScope::Tenant(tenant) => *tenant == tenant_scope,
            AlertScope::Owner {
                tenant_scope: tenant,
                ..
            } => *tenant == tenant_scope,
        }
    }
}

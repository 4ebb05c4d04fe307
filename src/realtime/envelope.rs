//! Wire frames exchanged over the live channel.
//!
//! Frames are JSON objects tagged by `type`, e.g.
//! `{"type":"updated","alert":{...},"version":2}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Alert;

/// Alert change published to live sessions.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Created(Alert),
    Updated(Alert),
}

impl Delta {
    pub fn alert(&self) -> &Alert {
        match self {
            Delta::Created(alert) | Delta::Updated(alert) => alert,
        }
    }

    pub fn kind(&self) -> DeltaKind {
        match self {
            Delta::Created(_) => DeltaKind::Created,
            Delta::Updated(_) => DeltaKind::Updated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    Created,
    Updated,
}

impl DeltaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeltaKind::Created => "created",
            DeltaKind::Updated => "updated",
        }
    }
}

/// Push payload delivered to one session: `{type, alert, version}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: DeltaKind,
    pub alert: Alert,
    pub version: i64,
}

impl From<Delta> for Envelope {
    fn from(delta: Delta) -> Self {
        let kind = delta.kind();
        let alert = match delta {
            Delta::Created(alert) | Delta::Updated(alert) => alert,
        };
        Self {
            kind,
            version: alert.version,
            alert,
        }
    }
}

/// Pull snapshot: every visible alert plus the highest version seen per tenant scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlertSnapshot {
    pub alerts: Vec<Alert>,
    #[schema(value_type = Object)]
    pub watermarks: BTreeMap<Uuid, i64>,
}

impl AlertSnapshot {
    pub fn from_alerts(alerts: Vec<Alert>) -> Self {
        let mut watermarks = BTreeMap::new();
        for alert in &alerts {
            let mark = watermarks.entry(alert.tenant_scope).or_insert(alert.version);
            *mark = (*mark).max(alert.version);
        }
        Self { alerts, watermarks }
    }
}

/// Server to client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Hello { session_id: Uuid },
    Snapshot(AlertSnapshot),
    Created { alert: Alert, version: i64 },
    Updated { alert: Alert, version: i64 },
    Error { code: String, message: String },
}

impl From<&Envelope> for ServerFrame {
    fn from(envelope: &Envelope) -> Self {
        let alert = envelope.alert.clone();
        match envelope.kind {
            DeltaKind::Created => ServerFrame::Created {
                alert,
                version: envelope.version,
            },
            DeltaKind::Updated => ServerFrame::Updated {
                alert,
                version: envelope.version,
            },
        }
    }
}

/// Client to server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Client applied everything up to `version` for `tenant_scope`
    Ack { tenant_scope: Uuid, version: i64 },
    /// Ask for a fresh snapshot
    Resync,
}

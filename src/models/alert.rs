//! Alert entity model
//!
//! This module contains the SeaORM entity model for the alerts table together with the
//! status and severity enums and the public [`Alert`] representation pushed to viewers.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Alert entity representing one scored event flagged for human review
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    /// Unique identifier for the alert (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Originating scored event; unique across the table
    pub source_event_id: String,

    /// Owning organizational unit
    pub tenant_scope: Uuid,

    /// Account the flagged transaction belongs to, if known
    pub owner_id: Option<String>,

    pub severity: Severity,

    /// Risk score at creation time
    pub score: f64,

    pub status: AlertStatus,

    /// Viewer currently responsible for the alert
    pub assignee: Option<String>,

    /// Bumped on every mutation; optimistic concurrency token
    pub version: i64,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle status of an alert
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum AlertStatus {
    #[sea_orm(string_value = "open")]
    #[serde(rename = "open")]
    #[default]
    Open,

    #[sea_orm(string_value = "investigating")]
    #[serde(rename = "investigating")]
    Investigating,

    #[sea_orm(string_value = "resolved")]
    #[serde(rename = "resolved")]
    Resolved,

    #[sea_orm(string_value = "false_positive")]
    #[serde(rename = "falsePositive")]
    FalsePositive,
}

impl AlertStatus {
    /// Terminal states have no outgoing edges.
    pub fn is_terminal(self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::FalsePositive)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Investigating => "investigating",
            AlertStatus::Resolved => "resolved",
            AlertStatus::FalsePositive => "falsePositive",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity band derived once from the score at creation
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[sea_orm(string_value = "low")]
    Low,
    #[sea_orm(string_value = "medium")]
    Medium,
    #[sea_orm(string_value = "high")]
    High,
    #[sea_orm(string_value = "critical")]
    Critical,
}

/// Public representation of an alert, used for pull responses and push envelopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Alert {
    pub id: Uuid,
    pub source_event_id: String,
    pub tenant_scope: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub severity: Severity,
    pub score: f64,
    pub status: AlertStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub version: i64,
    #[schema(value_type = String, example = "2026-01-01T12:00:00Z")]
    pub created_at: DateTimeWithTimeZone,
    #[schema(value_type = String, example = "2026-01-01T12:05:00Z")]
    pub updated_at: DateTimeWithTimeZone,
}

impl From<Model> for Alert {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            source_event_id: model.source_event_id,
            tenant_scope: model.tenant_scope,
            owner_id: model.owner_id,
            severity: model.severity,
            score: model.score,
            status: model.status,
            assignee: model.assignee,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Lightweight reference returned by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlertRef {
    pub id: Uuid,
    pub source_event_id: String,
    pub severity: Severity,
    pub version: i64,
    /// False when the event had already been materialized
    pub created: bool,
}

impl AlertRef {
    pub fn new(alert: &Alert, created: bool) -> Self {
        Self {
            id: alert.id,
            source_event_id: alert.source_event_id.clone(),
            severity: alert.severity,
            version: alert.version,
            created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_wire_names() {
        let json = serde_json::to_string(&AlertStatus::FalsePositive).unwrap();
        assert_eq!(json, "\"falsePositive\"");

        let parsed: AlertStatus = serde_json::from_str("\"investigating\"").unwrap();
        assert_eq!(parsed, AlertStatus::Investigating);
    }

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
    }

    #[test]
    fn only_resolved_and_false_positive_are_terminal() {
        assert!(!AlertStatus::Open.is_terminal());
        assert!(!AlertStatus::Investigating.is_terminal());
        assert!(AlertStatus::Resolved.is_terminal());
        assert!(AlertStatus::FalsePositive.is_terminal());
    }
}

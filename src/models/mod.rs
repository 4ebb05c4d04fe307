//! # Data Models
//!
//! This module contains the data models used throughout the alerts service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod alert;
pub mod viewer;

pub use alert::{Alert, AlertRef, AlertStatus, Entity as AlertEntity, Severity};
pub use viewer::{Role, ViewerIdentity};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "fraud-alerts".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

//! # Repository Layer
//!
//! Storage boundary for the alerts service. Callers depend on the [`AlertStore`] trait;
//! SeaORM specifics stay inside this module.

pub mod alert;

pub use alert::{AlertFilter, AlertStore, CasOutcome, NewAlert, SeaOrmAlertStore};

//! # Fraud Alerts Library
//!
//! Alert lifecycle and real-time delivery: ingestion of scored events, the alert state machine,
//! visibility scoping, the live session registry and fan-out, plus the HTTP/WebSocket edge.

pub mod alerts;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod realtime;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub use migration;

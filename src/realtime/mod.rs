//! # Real-Time Delivery
//!
//! Live session registry, delta fan-out and the sync protocol that lets a client hold a
//! gap-free view across disconnects.

pub mod dispatcher;
pub mod envelope;
pub mod registry;
pub mod sync;

pub use dispatcher::{DeltaPublisher, Dispatcher, FanoutReport};
pub use envelope::{AlertSnapshot, ClientFrame, Delta, DeltaKind, Envelope, ServerFrame};
pub use registry::{ConnectionRegistry, SessionHandle, SessionInfo};
pub use sync::{ApplyOutcome, SyncState};

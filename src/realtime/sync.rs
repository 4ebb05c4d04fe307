//! Client-side replica of the sync protocol.
//!
//! A client seeds itself from a pull snapshot, then applies pushed deltas. Per alert only
//! strictly newer versions are applied, so duplicated or reordered deltas converge to the
//! server's state. After a disconnect the replica must be re-seeded with a fresh snapshot;
//! the server keeps nothing for disconnected sessions.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::models::Alert;
use crate::realtime::envelope::{AlertSnapshot, ClientFrame, Envelope, ServerFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Version at or below what is already held
    Duplicate,
    /// Frame carries no alert state
    Ignored,
}

#[derive(Debug, Default)]
pub struct SyncState {
    alerts: HashMap<Uuid, Alert>,
    watermarks: BTreeMap<Uuid, i64>,
    seeded: bool,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True before the first snapshot and after every disconnect.
    pub fn needs_resync(&self) -> bool {
        !self.seeded
    }

    pub fn mark_disconnected(&mut self) {
        self.seeded = false;
    }

    /// Seeds (or re-seeds) the replica. Alerts already held at a newer version are kept.
    pub fn apply_snapshot(&mut self, snapshot: AlertSnapshot) {
        for alert in snapshot.alerts {
            self.upsert(alert);
        }
        for (tenant, version) in snapshot.watermarks {
            self.advance(tenant, version);
        }
        self.seeded = true;
    }

    pub fn apply(&mut self, envelope: &Envelope) -> ApplyOutcome {
        if self.upsert(envelope.alert.clone()) {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Duplicate
        }
    }

    pub fn apply_frame(&mut self, frame: ServerFrame) -> ApplyOutcome {
        match frame {
            ServerFrame::Snapshot(snapshot) => {
                self.apply_snapshot(snapshot);
                ApplyOutcome::Applied
            }
            ServerFrame::Created { alert, .. } | ServerFrame::Updated { alert, .. } => {
                if self.upsert(alert) {
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::Duplicate
                }
            }
            ServerFrame::Hello { .. } | ServerFrame::Error { .. } => ApplyOutcome::Ignored,
        }
    }

    pub fn alert(&self, id: Uuid) -> Option<&Alert> {
        self.alerts.get(&id)
    }

    /// Held alerts ordered by creation time.
    pub fn alerts(&self) -> Vec<&Alert> {
        let mut alerts: Vec<&Alert> = self.alerts.values().collect();
        alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        alerts
    }

    pub fn last_acked_version(&self, tenant_scope: Uuid) -> Option<i64> {
        self.watermarks.get(&tenant_scope).copied()
    }

    /// Ack frame reporting the current watermark for `tenant_scope`.
    pub fn ack_for(&self, tenant_scope: Uuid) -> Option<ClientFrame> {
        self.last_acked_version(tenant_scope)
            .map(|version| ClientFrame::Ack {
                tenant_scope,
                version,
            })
    }

    fn upsert(&mut self, alert: Alert) -> bool {
        let newer = self
            .alerts
            .get(&alert.id)
            .is_none_or(|held| alert.version > held.version);
        if !newer {
            return false;
        }
        self.advance(alert.tenant_scope, alert.version);
        self.alerts.insert(alert.id, alert);
        true
    }

    fn advance(&mut self, tenant_scope: Uuid, version: i64) {
        let mark = self.watermarks.entry(tenant_scope).or_insert(version);
        *mark = (*mark).max(version);
    }
}

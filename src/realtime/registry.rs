//! Connection registry: live viewer sessions keyed by session id.
//!
//! Backed by a sharded [`DashMap`]. Enumeration clones `Arc` handles out of the map so no shard
//! lock is held while envelopes are delivered; a session removed after being enumerated fails
//! soft at delivery time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use metrics::gauge;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::alerts::visibility::scope_for;
use crate::models::{Role, ViewerIdentity};
use crate::realtime::envelope::Envelope;

/// A live transport session as seen by the dispatcher.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: Uuid,
    viewer: ViewerIdentity,
    connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Arc<Envelope>>,
    cancel: CancellationToken,
    last_acked: DashMap<Uuid, i64>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn viewer(&self) -> &ViewerIdentity {
        &self.viewer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn sender(&self) -> &mpsc::Sender<Arc<Envelope>> {
        &self.sender
    }

    /// Fires when the session is unregistered or its transport closes.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn last_acked_version(&self, tenant_scope: Uuid) -> Option<i64> {
        self.last_acked.get(&tenant_scope).map(|v| *v)
    }

    fn ack(&self, tenant_scope: Uuid, version: i64) {
        self.last_acked
            .entry(tenant_scope)
            .and_modify(|current| *current = (*current).max(version))
            .or_insert(version);
    }
}

/// Admin-facing description of a session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub viewer_id: String,
    pub role: Role,
    #[schema(value_type = String)]
    pub connected_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub last_acked_version: std::collections::BTreeMap<Uuid, i64>,
}

pub struct ConnectionRegistry {
    sessions: DashMap<Uuid, Arc<SessionHandle>>,
    buffer: usize,
}

impl ConnectionRegistry {
    /// `buffer` is the outbound envelope queue depth per session.
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Registers a session and returns the receiving half of its outbound queue.
    ///
    /// Idempotent per session id: a second call keeps the existing entry and returns `None`.
    pub fn register(
        &self,
        session_id: Uuid,
        viewer: ViewerIdentity,
    ) -> Option<mpsc::Receiver<Arc<Envelope>>> {
        let receiver = match self.sessions.entry(session_id) {
            Entry::Occupied(_) => {
                tracing::debug!(%session_id, "Session already registered");
                return None;
            }
            Entry::Vacant(slot) => {
                let (sender, receiver) = mpsc::channel(self.buffer);
                tracing::info!(
                    %session_id,
                    viewer_id = %viewer.viewer_id,
                    role = viewer.role.as_str(),
                    "Session registered"
                );
                slot.insert(Arc::new(SessionHandle {
                    session_id,
                    viewer,
                    connected_at: Utc::now(),
                    sender,
                    cancel: CancellationToken::new(),
                    last_acked: DashMap::new(),
                }));
                receiver
            }
        };

        gauge!("registry_sessions").set(self.sessions.len() as f64);
        Some(receiver)
    }

    /// Removes a session and cancels its token. Unknown ids are a no-op.
    pub fn unregister(&self, session_id: Uuid) -> bool {
        match self.sessions.remove(&session_id) {
            Some((_, handle)) => {
                handle.cancel.cancel();
                gauge!("registry_sessions").set(self.sessions.len() as f64);
                tracing::info!(%session_id, viewer_id = %handle.viewer.viewer_id, "Session unregistered");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, session_id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&session_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of sessions matching `predicate`; no lock is held once this returns.
    pub fn sessions_for<P>(&self, predicate: P) -> Vec<Arc<SessionHandle>>
    where
        P: Fn(&SessionHandle) -> bool,
    {
        self.sessions
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn sessions_for_viewer(&self, viewer_id: &str) -> Vec<Arc<SessionHandle>> {
        self.sessions_for(|handle| handle.viewer.viewer_id == viewer_id)
    }

    /// Records a client ack. Never lowers the stored version.
    ///
    /// Acks for a tenant outside the viewer's scope are ignored and return `false`.
    pub fn ack(&self, session_id: Uuid, tenant_scope: Uuid, version: i64) -> bool {
        let Some(handle) = self.sessions.get(&session_id) else {
            return false;
        };
        let in_scope = scope_for(&handle.viewer)
            .is_some_and(|scope| scope.covers_tenant(tenant_scope));
        if !in_scope {
            tracing::debug!(
                %session_id,
                %tenant_scope,
                viewer_id = %handle.viewer.viewer_id,
                "Ignoring ack for tenant outside viewer scope"
            );
            return false;
        }
        handle.ack(tenant_scope, version);
        true
    }

    pub fn describe(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions_for(|_| true)
            .into_iter()
            .map(|handle| SessionInfo {
                session_id: handle.session_id,
                viewer_id: handle.viewer.viewer_id.clone(),
                role: handle.viewer.role,
                connected_at: handle.connected_at,
                last_acked_version: handle
                    .last_acked
                    .iter()
                    .map(|entry| (*entry.key(), *entry.value()))
                    .collect(),
            })
            .collect();
        sessions.sort_by_key(|info| info.connected_at);
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Cancels and drops every session; used on shutdown.
    pub fn close_all(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.unregister(id);
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}

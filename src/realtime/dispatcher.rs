//! Fan-out of alert deltas to authorized live sessions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::alerts::visibility::can_see;
use crate::config::DispatchConfig;
use crate::error::DeliveryFailure;
use crate::realtime::envelope::{Delta, Envelope};
use crate::realtime::registry::{ConnectionRegistry, SessionHandle};

/// Seam between writers (lifecycle engine) and the live channel.
pub trait DeltaPublisher: Send + Sync {
    /// Hands a delta off for delivery without waiting on any session.
    fn publish(&self, delta: Delta);
}

/// Per-fanout outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    pub delivered: usize,
    /// Sessions whose viewer may not see the alert
    pub skipped: usize,
    /// Sessions that were closed, timed out or cancelled; these are unregistered
    pub failed: usize,
}

/// Clones share one registry and one worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
    /// Bounds in-flight deliveries across every concurrent fanout
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, config: &DispatchConfig) -> Self {
        Self {
            registry,
            send_timeout: config.send_timeout(),
            workers: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Pushes `delta` to every live session whose viewer may see the alert.
    ///
    /// Deliveries run concurrently, bounded by the dispatcher-wide worker limit and the
    /// per-session send timeout. A failing session never affects the others; it is unregistered.
    pub async fn fanout(&self, delta: Delta) -> FanoutReport {
        let started = Instant::now();
        let envelope = Arc::new(Envelope::from(delta));
        let mut report = FanoutReport::default();

        let mut deliveries = JoinSet::new();

        for handle in self.registry.sessions_for(|_| true) {
            if !can_see(&envelope.alert, handle.viewer()) {
                report.skipped += 1;
                continue;
            }

            let workers = Arc::clone(&self.workers);
            let envelope = Arc::clone(&envelope);
            let send_timeout = self.send_timeout;

            deliveries.spawn(async move {
                let session_id = handle.session_id();
                let outcome = match workers.acquire_owned().await {
                    Ok(_permit) => deliver(&handle, envelope, send_timeout).await,
                    Err(_) => Err(DeliveryFailure::Cancelled),
                };
                (session_id, outcome)
            });
        }

        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((session_id, Err(failure))) => {
                    report.failed += 1;
                    self.drop_session(session_id, failure);
                }
                Err(join_error) => {
                    report.failed += 1;
                    error!(error = ?join_error, "Delivery task panicked or was aborted");
                }
            }
        }

        counter!("fanout_delivered_total").increment(report.delivered as u64);
        counter!("fanout_failed_total").increment(report.failed as u64);
        histogram!("fanout_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        debug!(
            alert_id = %envelope.alert.id,
            kind = envelope.kind.as_str(),
            version = envelope.version,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "Fanout completed"
        );

        report
    }

    fn drop_session(&self, session_id: Uuid, failure: DeliveryFailure) {
        warn!(%session_id, %failure, "Dropping session after failed delivery");
        self.registry.unregister(session_id);
    }
}

impl DeltaPublisher for Dispatcher {
    fn publish(&self, delta: Delta) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.fanout(delta).await;
        });
    }
}

async fn deliver(
    handle: &SessionHandle,
    envelope: Arc<Envelope>,
    send_timeout: Duration,
) -> Result<(), DeliveryFailure> {
    let cancel = handle.cancel_token();
    if cancel.is_cancelled() {
        return Err(DeliveryFailure::Cancelled);
    }

    tokio::select! {
        _ = cancel.cancelled() => Err(DeliveryFailure::Cancelled),
        sent = tokio::time::timeout(send_timeout, handle.sender().send(envelope)) => match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryFailure::Closed),
            Err(_) => Err(DeliveryFailure::TimedOut {
                timeout_ms: send_timeout.as_millis() as u64,
            }),
        },
    }
}

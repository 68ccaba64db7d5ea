//! Fan-out of one event to every open viewer.

use std::sync::Arc;

use metrics::counter;
use pulse_core::{Event, SessionId, WireFormat};
use pulse_settings::{OverflowPolicy, ServerSettings};
use pulse_telemetry::names;
use tracing::{debug, error, warn};

use crate::outbox::{DeliveryError, Frame, PushOutcome};
use crate::registry::ClientRegistry;
use crate::session::ViewerSession;

/// Per-broadcast delivery counts. Observability only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Open sessions in the snapshot.
    pub recipients: usize,
    /// Frames queued (including those that displaced an older frame).
    pub delivered: usize,
    /// Sessions torn down during this broadcast.
    pub failed: usize,
    /// Sessions that left on their own between the snapshot and the push.
    pub departed: usize,
    /// Older frames discarded to make room.
    pub dropped: usize,
}

/// Writes events into viewer outboxes. Never waits on a viewer.
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
    wire_format: WireFormat,
    overflow_policy: OverflowPolicy,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>, wire_format: WireFormat, overflow_policy: OverflowPolicy) -> Self {
        Self {
            registry,
            wire_format,
            overflow_policy,
        }
    }

    pub fn from_settings(registry: Arc<ClientRegistry>, settings: &ServerSettings) -> Self {
        Self::new(registry, settings.wire_format, settings.overflow_policy)
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Deliver `event` to every session open at the time of the call.
    ///
    /// A session whose push fails is marked closing while the snapshot is
    /// walked, then unregistered and closed once the walk is done. Sessions
    /// already closing on their own are skipped, not counted as failures.
    pub fn broadcast(&self, event: &Event) -> DeliveryReport {
        let frame: Frame = match event.to_wire(self.wire_format) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                error!(subject = %event.subject, error = %e, "failed to serialize event");
                return DeliveryReport::default();
            }
        };

        let sessions = self.registry.snapshot();
        self.fan_out(&frame, &sessions)
    }

    /// Push `frame` to each of `sessions`, tearing down the ones that fail.
    fn fan_out(&self, frame: &Frame, sessions: &[Arc<ViewerSession>]) -> DeliveryReport {
        let mut report = DeliveryReport {
            recipients: sessions.len(),
            ..DeliveryReport::default()
        };
        let mut failures: Vec<(SessionId, DeliveryError)> = Vec::new();

        for session in sessions {
            match session.deliver(Arc::clone(frame), self.overflow_policy) {
                Ok(PushOutcome::Queued) => report.delivered += 1,
                Ok(PushOutcome::DroppedOldest) => {
                    report.delivered += 1;
                    report.dropped += 1;
                }
                // Closed by its own stream or by a drain since the snapshot.
                Err(DeliveryError::Closed) if !session.is_open() => report.departed += 1,
                Err(e) => {
                    let _ = session.begin_close();
                    failures.push((session.id().clone(), e));
                }
            }
        }

        report.failed = failures.len();
        for (id, e) in failures {
            if let Some(session) = self.registry.unregister(&id) {
                session.close();
            }
            counter!(names::VIEWER_DELIVERY_FAILURES_TOTAL, "reason" => e.reason()).increment(1);
            warn!(session_id = %id, error = %e, "viewer delivery failed, closing session");
        }

        if report.departed > 0 {
            debug!(departed = report.departed, "viewers left during broadcast");
        }
        counter!(names::VIEWER_DELIVERIES_TOTAL).increment(report.delivered as u64);
        if report.dropped > 0 {
            counter!(names::VIEWER_OVERFLOW_DROPS_TOTAL).increment(report.dropped as u64);
            debug!(dropped = report.dropped, "dropped oldest frames for slow viewers");
        }
        report
    }
}

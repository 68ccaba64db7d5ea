//! Set of live viewer sessions.
//!
//! Shared by the consumer task (snapshots for broadcast) and every viewer's
//! connect/disconnect path. Backed by a sharded map so registration never
//! contends with a whole-set lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use metrics::gauge;
use pulse_core::SessionId;
use pulse_telemetry::names;
use tracing::{debug, info};

use crate::session::ViewerSession;

/// The registry was drained and accepts no more sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("client registry is drained")]
pub struct RegistryDrained;

/// Registry of all connected viewers. Created once at startup, drained once
/// at shutdown.
#[derive(Default)]
pub struct ClientRegistry {
    sessions: DashMap<SessionId, Arc<ViewerSession>>,
    drained: AtomicBool,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. A drained registry closes it instead.
    pub fn register(&self, session: Arc<ViewerSession>) -> Result<(), RegistryDrained> {
        if self.is_drained() {
            session.close();
            return Err(RegistryDrained);
        }

        let id = session.id().clone();
        let _ = self.sessions.entry(id.clone()).or_insert(session);

        // A drain that ran between the check above and the insert would have
        // missed this entry.
        if self.is_drained() {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.close();
            }
            self.update_gauge();
            return Err(RegistryDrained);
        }

        self.update_gauge();
        debug!(session_id = %id, "session registered");
        Ok(())
    }

    /// Remove a session if present. Returns the removed session.
    pub fn unregister(&self, id: &SessionId) -> Option<Arc<ViewerSession>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            self.update_gauge();
            debug!(session_id = %id, "session unregistered");
        }
        removed
    }

    /// Point-in-time copy of the open sessions, in connection order.
    pub fn snapshot(&self) -> Vec<Arc<ViewerSession>> {
        let mut open: Vec<Arc<ViewerSession>> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        open.sort_by(|a, b| a.id().cmp(b.id()));
        open
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<ViewerSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered sessions in any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn open_count(&self) -> usize {
        self.sessions.iter().filter(|entry| entry.value().is_open()).count()
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    /// Refuse new sessions and finish every registered one. Returns how many
    /// were finished. Later calls are no-ops.
    ///
    /// Finished sessions stop receiving broadcasts but still flush what is
    /// queued; each one is closed when its stream ends.
    pub fn drain(&self) -> usize {
        if self.drained.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        let mut finished = 0;
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.finish();
                finished += 1;
            }
        }
        self.update_gauge();
        info!(finished, "client registry drained");
        finished
    }

    fn update_gauge(&self) {
        gauge!(names::VIEWER_SESSIONS_REGISTERED).set(self.sessions.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::SessionState;

    fn session() -> Arc<ViewerSession> {
        Arc::new(ViewerSession::new(16, Duration::from_secs(5)))
    }

    fn open_session(registry: &ClientRegistry) -> Arc<ViewerSession> {
        let s = session();
        registry.register(Arc::clone(&s)).unwrap();
        assert!(s.mark_open());
        s
    }

    #[test]
    fn register_then_unregister_restores_size() {
        let registry = ClientRegistry::new();
        let _existing = open_session(&registry);
        let before = registry.len();

        let s = session();
        registry.register(Arc::clone(&s)).unwrap();
        assert_eq!(registry.len(), before + 1);
        let _ = registry.unregister(s.id());
        assert_eq!(registry.len(), before);
    }

    #[test]
    fn unregister_absent_is_noop() {
        let registry = ClientRegistry::new();
        let s = session();
        assert!(registry.unregister(s.id()).is_none());
        registry.register(Arc::clone(&s)).unwrap();
        assert!(registry.unregister(s.id()).is_some());
        assert!(registry.unregister(s.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_registration_keeps_one_entry() {
        let registry = ClientRegistry::new();
        let s = session();
        registry.register(Arc::clone(&s)).unwrap();
        registry.register(Arc::clone(&s)).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_only_contains_open_sessions_in_order() {
        let registry = ClientRegistry::new();
        let a = open_session(&registry);
        let connecting = session();
        registry.register(Arc::clone(&connecting)).unwrap();
        let b = open_session(&registry);

        let snap = registry.snapshot();
        let ids: Vec<&SessionId> = snap.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
        assert_eq!(registry.open_count(), 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let registry = ClientRegistry::new();
        let a = open_session(&registry);
        let snap = registry.snapshot();
        let _ = registry.unregister(a.id());
        let _late = open_session(&registry);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id(), a.id());
    }

    #[test]
    fn drain_closes_everything_and_refuses_new_sessions() {
        let registry = ClientRegistry::new();
        let a = open_session(&registry);
        let b = open_session(&registry);

        assert_eq!(registry.drain(), 2);
        assert!(registry.is_empty());
        assert_eq!(a.state(), SessionState::Closing);
        assert!(!b.outbox().is_accepting());

        let late = session();
        assert_eq!(registry.register(Arc::clone(&late)), Err(RegistryDrained));
        assert_eq!(late.state(), SessionState::Closed);
        assert!(registry.is_empty());
        assert_eq!(registry.drain(), 0);
    }

    #[tokio::test]
    async fn drain_keeps_already_queued_frames() {
        let registry = ClientRegistry::new();
        let s = open_session(&registry);
        let _ = s.deliver(Arc::from("queued"), pulse_settings::OverflowPolicy::DropOldest);

        let _ = registry.drain();
        assert!(s
            .deliver(Arc::from("late"), pulse_settings::OverflowPolicy::DropOldest)
            .is_err());
        assert_eq!(s.outbox().recv().await.as_deref(), Some("queued"));
        assert_eq!(s.outbox().recv().await, None);
    }

    #[test]
    fn gauge_counts_connecting_sessions() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let registry = ClientRegistry::new();
        metrics::with_local_recorder(&recorder, || {
            let _open = open_session(&registry);
            registry.register(session()).unwrap();
        });
        assert_eq!(registry.open_count(), 1);
        let output = handle.render();
        assert!(output.contains("pulse_viewer_sessions_registered 2"), "{output}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_and_unregister() {
        let registry = Arc::new(ClientRegistry::new());
        let mut handles = Vec::new();
        for i in 0..1_000 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let s = session();
                registry.register(Arc::clone(&s)).unwrap();
                let _ = s.mark_open();
                if i % 4 == 0 {
                    let _ = registry.unregister(s.id());
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.len(), 750);
        assert_eq!(registry.open_count(), 750);
    }
}

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulse_core::SessionId;
use pulse_settings::OverflowPolicy;

use crate::outbox::{DeliveryError, Frame, Outbox, PushOutcome};

/// Lifecycle of one viewer connection. Only `Open` sessions receive frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// One connected viewer. The SSE stream task is the only reader of its
/// outbox; the broadcaster is the only writer.
pub struct ViewerSession {
    id: SessionId,
    state: AtomicU8,
    outbox: Outbox,
    connected_at: DateTime<Utc>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ViewerSession {
    pub fn new(queue_capacity: usize, stall_timeout: Duration) -> Self {
        Self {
            id: SessionId::new(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            outbox: Outbox::new(queue_capacity, stall_timeout),
            connected_at: Utc::now(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// `Connecting → Open`. Returns whether this call made the transition.
    pub fn mark_open(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Open)
    }

    /// `Connecting | Open → Closing`. Returns whether this call made the transition.
    pub fn begin_close(&self) -> bool {
        self.transition(SessionState::Open, SessionState::Closing)
            || self.transition(SessionState::Connecting, SessionState::Closing)
    }

    /// `→ Closing` without losing queued frames: the stream flushes them and
    /// then ends, and its guard closes the session.
    pub fn finish(&self) {
        let _ = self.begin_close();
        self.outbox.finish();
    }

    /// Final state. Closes the outbox, which ends the viewer's stream.
    pub fn close(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
        self.outbox.close();
    }

    /// Queue a frame for this viewer without waiting.
    pub fn deliver(&self, frame: Frame, policy: OverflowPolicy) -> Result<PushOutcome, DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Closed);
        }
        let outcome = self.outbox.push(frame, policy)?;
        let _ = self.delivered.fetch_add(1, Ordering::Relaxed);
        if outcome == PushOutcome::DroppedOldest {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for ViewerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("queued", &self.outbox.len())
            .finish()
    }
}

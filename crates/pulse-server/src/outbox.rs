//! Bounded per-viewer frame queue.
//!
//! The broadcaster pushes without waiting; the viewer's SSE stream pops. A
//! full queue either drops its oldest frame or fails the push, depending on
//! the [`OverflowPolicy`]. A queue that stays full for longer than the stall
//! timeout fails every push, which tears the viewer down.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pulse_settings::OverflowPolicy;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A serialized event, shared by every outbox it is pushed to.
pub type Frame = Arc<str>;

/// Successful push result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after discarding the oldest pending frame.
    DroppedOldest,
}

/// Why a frame could not be handed to a viewer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("viewer transport closed")]
    Closed,
    #[error("viewer queue saturated for {0:?}")]
    Stalled(Duration),
    #[error("viewer queue full")]
    Overflow,
}

impl DeliveryError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Stalled(_) => "stalled",
            Self::Overflow => "overflow",
        }
    }
}

#[derive(Default)]
struct Queue {
    frames: VecDeque<Frame>,
    closed: bool,
    /// No more pushes; the reader empties the queue, then sees the end.
    finishing: bool,
    saturated_since: Option<Instant>,
}

pub struct Outbox {
    queue: Mutex<Queue>,
    ready: Notify,
    capacity: usize,
    stall_timeout: Duration,
}

impl Outbox {
    pub fn new(capacity: usize, stall_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(Queue {
                frames: VecDeque::with_capacity(capacity.min(64)),
                ..Queue::default()
            }),
            ready: Notify::new(),
            capacity,
            stall_timeout,
        }
    }

    /// Enqueue without waiting.
    pub fn push(&self, frame: Frame, policy: OverflowPolicy) -> Result<PushOutcome, DeliveryError> {
        let outcome = {
            let mut queue = self.queue.lock();
            if queue.closed || queue.finishing {
                return Err(DeliveryError::Closed);
            }

            if queue.frames.len() < self.capacity {
                queue.frames.push_back(frame);
                PushOutcome::Queued
            } else {
                match policy {
                    OverflowPolicy::Disconnect => return Err(DeliveryError::Overflow),
                    OverflowPolicy::DropOldest => {
                        let since = *queue.saturated_since.get_or_insert_with(Instant::now);
                        let saturated_for = since.elapsed();
                        if saturated_for >= self.stall_timeout {
                            return Err(DeliveryError::Stalled(saturated_for));
                        }
                        let _ = queue.frames.pop_front();
                        queue.frames.push_back(frame);
                        PushOutcome::DroppedOldest
                    }
                }
            }
        };
        self.ready.notify_one();
        Ok(outcome)
    }

    /// Next frame, or `None` once the outbox is closed.
    ///
    /// Single reader. Frames still queued at [`close`](Self::close) are
    /// discarded; after [`finish`](Self::finish) they are returned first.
    pub async fn recv(&self) -> Option<Frame> {
        loop {
            let ready = self.ready.notified();
            {
                let mut queue = self.queue.lock();
                if queue.closed {
                    return None;
                }
                if let Some(frame) = queue.frames.pop_front() {
                    queue.saturated_since = None;
                    return Some(frame);
                }
                if queue.finishing {
                    return None;
                }
            }
            ready.await;
        }
    }

    /// Refuse further pushes but let the reader drain what is queued.
    pub fn finish(&self) {
        self.queue.lock().finishing = true;
        self.ready.notify_one();
    }

    /// Refuse further pushes and discard anything still queued.
    pub fn close(&self) {
        {
            let mut queue = self.queue.lock();
            queue.closed = true;
            queue.frames.clear();
        }
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    /// Closed, or finishing and no longer accepting frames.
    pub fn is_accepting(&self) -> bool {
        let queue = self.queue.lock();
        !(queue.closed || queue.finishing)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! The reconnecting consume loop.
//!
//! ```text
//! Disconnected → Connecting → Subscribed → Consuming
//!                    ↑                         │
//!                    └──── connection lost ────┘
//! ```
//!
//! Only cancellation moves the loop back to `Disconnected`. Failed connects
//! and lost connections both wait out the backoff before the next attempt;
//! the delay only resets once a connection has delivered a message.
//!
//! Each message is handed to the [`MessageHandler`] and committed afterwards,
//! so a restart may redeliver the tail that was handled but not yet
//! committed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::counter;
use pulse_telemetry::names;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::BusError;
use crate::source::{BusConnector, BusSubscription, MessageHandler};

/// Where the consumer is in its connection lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConsumerState {
    #[default]
    Disconnected,
    Connecting,
    Subscribed,
    Consuming,
}

impl ConsumerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Consuming => "consuming",
        }
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters exposed for health and tests.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    consuming_entries: AtomicU64,
    messages: AtomicU64,
    commit_failures: AtomicU64,
}

impl ConsumerStats {
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    /// Number of times the loop entered `Consuming`.
    pub fn consuming_entries(&self) -> u64 {
        self.consuming_entries.load(Ordering::Relaxed)
    }

    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn commit_failures(&self) -> u64 {
        self.commit_failures.load(Ordering::Relaxed)
    }
}

enum ConsumeEnd {
    Cancelled,
    /// The subscription failed after handing out `consumed` messages.
    Lost { error: BusError, consumed: u64 },
}

/// Owns the bus subscription and feeds every message to the handler.
pub struct BusConsumer {
    connector: Arc<dyn BusConnector>,
    handler: Arc<dyn MessageHandler>,
    backoff: BackoffPolicy,
    state_tx: watch::Sender<ConsumerState>,
    stats: Arc<ConsumerStats>,
}

impl BusConsumer {
    pub fn new(
        connector: Arc<dyn BusConnector>,
        handler: Arc<dyn MessageHandler>,
        backoff: BackoffPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            connector,
            handler,
            backoff,
            state_tx,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `cancel` fires. Never returns early on bus errors.
    pub async fn run(self, cancel: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(ConsumerState::Connecting);
            let _ = self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);

            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.connector.connect() => result,
            };

            let mut subscription = match connected {
                Ok(subscription) => subscription,
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    let _ = self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                    counter!(names::BUS_CONNECT_FAILURES_TOTAL, "kind" => e.error_kind()).increment(1);
                    if e.is_retryable() {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "bus connect failed, retrying"
                        );
                    } else {
                        error!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "bus connect failed with a non-transient error, retrying"
                        );
                    }
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            self.set_state(ConsumerState::Subscribed);

            self.set_state(ConsumerState::Consuming);
            let _ = self.stats.consuming_entries.fetch_add(1, Ordering::Relaxed);
            info!(retries = attempt, "consuming");

            let (error, consumed) = match self.consume(subscription.as_mut(), &cancel).await {
                ConsumeEnd::Cancelled => break,
                ConsumeEnd::Lost { error, consumed } => (error, consumed),
            };
            drop(subscription);

            // Only a connection that delivered something counts as healthy;
            // one that fails straight after subscribing keeps escalating.
            if consumed > 0 {
                attempt = 0;
            }
            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            counter!(names::BUS_RECONNECTS_TOTAL).increment(1);
            warn!(
                error = %error,
                kind = error.error_kind(),
                consumed,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "bus connection lost, reconnecting"
            );
            self.set_state(ConsumerState::Connecting);
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConsumerState::Disconnected);
        info!("bus consumer stopped");
    }

    async fn consume(
        &self,
        subscription: &mut dyn BusSubscription,
        cancel: &CancellationToken,
    ) -> ConsumeEnd {
        let mut consumed: u64 = 0;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return ConsumeEnd::Cancelled,
                next = subscription.next_message() => next,
            };

            let message = match next {
                Ok(Some(message)) => message,
                Ok(None) => {
                    return ConsumeEnd::Lost {
                        error: BusError::Closed,
                        consumed,
                    }
                }
                Err(error) => return ConsumeEnd::Lost { error, consumed },
            };
            consumed += 1;

            let _ = self.stats.messages.fetch_add(1, Ordering::Relaxed);
            counter!(names::EVENTS_CONSUMED_TOTAL).increment(1);
            debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                bytes = message.payload.len(),
                "message received"
            );

            // Not raced against cancellation: a started broadcast always
            // finishes, and its commit follows.
            self.handler.handle(&message).await;

            if let Err(e) = subscription.commit(&message).await {
                let _ = self.stats.commit_failures.fetch_add(1, Ordering::Relaxed);
                counter!(names::BUS_COMMIT_FAILURES_TOTAL).increment(1);
                warn!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "offset commit failed"
                );
            }
        }
    }

    fn set_state(&self, state: ConsumerState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "consumer state");
        }
    }
}

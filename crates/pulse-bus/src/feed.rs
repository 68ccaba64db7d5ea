//! Synthetic producer for local runs without an upstream pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pulse_core::{Event, WireFormat};
use pulse_settings::DemoSettings;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::source::BusProducer;

/// Publishes one random reading per tick for a randomly chosen subject.
///
/// Each publish is awaited before the next tick, so a slow bus slows the
/// feed instead of queueing records in memory.
pub struct DemoFeed {
    producer: Arc<dyn BusProducer>,
    subjects: Vec<String>,
    interval: Duration,
    limit: Option<u64>,
}

impl DemoFeed {
    pub fn new(producer: Arc<dyn BusProducer>, settings: &DemoSettings) -> Self {
        Self {
            producer,
            subjects: settings.subjects.clone(),
            interval: Duration::from_millis(settings.interval_ms.max(1)),
            limit: None,
        }
    }

    /// Stop after `limit` successful publishes.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Run until cancelled or the limit is reached. Returns records published.
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut published: u64 = 0;

        info!(
            subjects = self.subjects.len(),
            interval_ms = self.interval.as_millis() as u64,
            "demo feed started"
        );

        while self.limit.map_or(true, |limit| published < limit) {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(event) = self.next_event() else {
                warn!("demo feed has no subjects, stopping");
                break;
            };
            let payload = match event.to_wire(WireFormat::Canonical) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "failed to encode demo event");
                    continue;
                }
            };

            match self.producer.publish(Some(&event.subject), payload.as_bytes()).await {
                Ok(()) => {
                    published += 1;
                    debug!(subject = %event.subject, value = event.value, published, "demo event published");
                }
                Err(e) => warn!(error = %e, kind = e.error_kind(), "demo publish failed"),
            }
        }

        info!(published, "demo feed stopped");
        published
    }

    fn next_event(&self) -> Option<Event> {
        let mut rng = rand::thread_rng();
        let subject = self.subjects.choose(&mut rng)?;
        Some(Event::new(subject.clone(), Utc::now(), rng.gen_range(0.0..100.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;
    use crate::source::BusConnector;

    fn settings(subjects: &[&str]) -> DemoSettings {
        DemoSettings {
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            interval_ms: 2_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_canonical_events_until_limit() {
        let bus = MemoryBus::new("rsi-data", 1);
        let mut sub = bus.connector("g", true).connect().await.unwrap();

        let feed = DemoFeed::new(Arc::new(bus.clone()), &settings(&["SOLANA", "BONK"])).with_limit(3);
        let published = feed.run(CancellationToken::new()).await;
        assert_eq!(published, 3);
        assert_eq!(bus.len(), 3);

        for _ in 0..3 {
            let msg = sub.next_message().await.unwrap().unwrap();
            let event: Event = serde_json::from_slice(&msg.payload).unwrap();
            assert!(["SOLANA", "BONK"].contains(&event.subject.as_str()));
            assert!((0.0..100.0).contains(&event.value));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_configured_interval() {
        let bus = MemoryBus::new("rsi-data", 1);
        let feed = DemoFeed::new(Arc::new(bus.clone()), &settings(&["BITCOIN"]));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(feed.run(cancel.clone()));

        // First tick fires immediately, then every 2 s.
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn empty_subjects_stop_immediately() {
        let bus = MemoryBus::new("rsi-data", 1);
        let feed = DemoFeed::new(Arc::new(bus.clone()), &settings(&[]));
        assert_eq!(feed.run(CancellationToken::new()).await, 0);
        assert!(bus.is_empty());
    }
}

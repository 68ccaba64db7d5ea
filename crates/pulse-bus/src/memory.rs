//! In-process partitioned topic.
//!
//! Backs the `demo` source and the tests. It keeps the bus semantics the
//! consumer relies on: per-partition ordering, committed offsets per
//! consumer group, and a starting position taken from the committed offset
//! or, without one, from the configured reset policy.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::BusError;
use crate::source::{BusConnector, BusMessage, BusProducer, BusSubscription};

#[derive(Default)]
struct Log {
    partitions: Vec<Vec<Vec<u8>>>,
    committed: HashMap<String, Vec<Option<i64>>>,
    round_robin: usize,
}

struct Shared {
    topic: String,
    log: Mutex<Log>,
    notify: Notify,
    failing_connects: AtomicU32,
    generation: AtomicU64,
}

/// An in-memory topic with a fixed number of partitions.
#[derive(Clone)]
pub struct MemoryBus {
    shared: Arc<Shared>,
}

impl MemoryBus {
    pub fn new(topic: impl Into<String>, partitions: usize) -> Self {
        let partitions = partitions.max(1);
        Self {
            shared: Arc::new(Shared {
                topic: topic.into(),
                log: Mutex::new(Log {
                    partitions: vec![Vec::new(); partitions],
                    ..Log::default()
                }),
                notify: Notify::new(),
                failing_connects: AtomicU32::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    /// A connector for `group_id`.
    ///
    /// `from_beginning` only applies when the group has no committed offset
    /// for a partition; otherwise consumption starts at the log end.
    pub fn connector(&self, group_id: impl Into<String>, from_beginning: bool) -> MemoryConnector {
        MemoryConnector {
            bus: self.clone(),
            group_id: group_id.into(),
            from_beginning,
        }
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.shared.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Drop every live subscription, as a broker restart would.
    pub fn disconnect(&self) {
        let _ = self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// Next offset the group will read from `partition`, if it committed one.
    pub fn committed_offset(&self, group_id: &str, partition: i32) -> Option<i64> {
        let log = self.shared.log.lock();
        log.committed
            .get(group_id)
            .and_then(|offsets| offsets.get(usize::try_from(partition).ok()?).copied())
            .flatten()
    }

    /// Total records across all partitions.
    pub fn len(&self) -> usize {
        self.shared.log.lock().partitions.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&self, key: Option<&str>, payload: &[u8]) {
        {
            let mut log = self.shared.log.lock();
            let count = log.partitions.len();
            let partition = match key {
                Some(key) => {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    (hasher.finish() % count as u64) as usize
                }
                None => {
                    let p = log.round_robin % count;
                    log.round_robin = log.round_robin.wrapping_add(1);
                    p
                }
            };
            log.partitions[partition].push(payload.to_vec());
        }
        self.shared.notify.notify_waiters();
    }
}

#[async_trait]
impl BusProducer for MemoryBus {
    async fn publish(&self, key: Option<&str>, payload: &[u8]) -> Result<(), BusError> {
        self.append(key, payload);
        Ok(())
    }
}

/// Connects consumers of one group to a [`MemoryBus`].
pub struct MemoryConnector {
    bus: MemoryBus,
    group_id: String,
    from_beginning: bool,
}

#[async_trait]
impl BusConnector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn BusSubscription>, BusError> {
        let shared = &self.bus.shared;
        let failed = shared
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BusError::Connect(format!(
                "in-memory broker for {} refused the connection",
                shared.topic
            )));
        }

        let positions = {
            let log = shared.log.lock();
            let committed = log.committed.get(&self.group_id);
            log.partitions
                .iter()
                .enumerate()
                .map(|(p, records)| {
                    committed
                        .and_then(|offsets| offsets.get(p).copied().flatten())
                        .unwrap_or(if self.from_beginning { 0 } else { records.len() as i64 })
                })
                .collect()
        };

        Ok(Box::new(MemorySubscription {
            bus: self.bus.clone(),
            group_id: self.group_id.clone(),
            generation: shared.generation.load(Ordering::SeqCst),
            positions,
            next_partition: 0,
        }))
    }
}

struct MemorySubscription {
    bus: MemoryBus,
    group_id: String,
    generation: u64,
    positions: Vec<i64>,
    next_partition: usize,
}

impl MemorySubscription {
    fn poll_log(&mut self) -> Option<BusMessage> {
        let log = self.bus.shared.log.lock();
        let count = log.partitions.len();
        for step in 0..count {
            let p = (self.next_partition + step) % count;
            let offset = self.positions[p];
            if let Some(payload) = log.partitions[p].get(offset as usize) {
                self.positions[p] = offset + 1;
                self.next_partition = (p + 1) % count;
                return Some(BusMessage {
                    topic: self.bus.shared.topic.clone(),
                    partition: p as i32,
                    offset,
                    payload: payload.clone(),
                });
            }
        }
        None
    }
}

#[async_trait]
impl BusSubscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Option<BusMessage>, BusError> {
        let shared = Arc::clone(&self.bus.shared);
        loop {
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shared.generation.load(Ordering::SeqCst) != self.generation {
                return Err(BusError::Receive("in-memory broker connection reset".into()));
            }
            if let Some(message) = self.poll_log() {
                return Ok(Some(message));
            }

            notified.await;
        }
    }

    async fn commit(&mut self, message: &BusMessage) -> Result<(), BusError> {
        if self.bus.shared.generation.load(Ordering::SeqCst) != self.generation {
            return Err(BusError::Commit("in-memory broker connection reset".into()));
        }
        let mut log = self.bus.shared.log.lock();
        let partitions = log.partitions.len();
        let offsets = log
            .committed
            .entry(self.group_id.clone())
            .or_insert_with(|| vec![None; partitions]);
        let slot = offsets
            .get_mut(message.partition as usize)
            .ok_or_else(|| BusError::Commit(format!("no partition {}", message.partition)))?;
        let next = message.offset + 1;
        if slot.map_or(true, |current| next > current) {
            *slot = Some(next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_start_skips_existing_records() {
        let bus = MemoryBus::new("t", 1);
        bus.publish(None, b"old").await.unwrap();

        let mut sub = bus.connector("g", false).connect().await.unwrap();
        bus.publish(None, b"new").await.unwrap();

        let msg = sub.next_message().await.unwrap().unwrap();
        assert_eq!(msg.payload, b"new");
        assert_eq!(msg.offset, 1);
    }

    #[tokio::test]
    async fn earliest_start_reads_everything() {
        let bus = MemoryBus::new("t", 1);
        bus.publish(None, b"a").await.unwrap();
        bus.publish(None, b"b").await.unwrap();

        let mut sub = bus.connector("g", true).connect().await.unwrap();
        assert_eq!(sub.next_message().await.unwrap().unwrap().payload, b"a");
        assert_eq!(sub.next_message().await.unwrap().unwrap().payload, b"b");
    }

    #[tokio::test]
    async fn committed_offset_wins_over_reset_policy() {
        let bus = MemoryBus::new("t", 1);
        let mut sub = bus.connector("g", true).connect().await.unwrap();
        for p in [b"a", b"b", b"c"] {
            bus.publish(None, p).await.unwrap();
        }
        let first = sub.next_message().await.unwrap().unwrap();
        sub.commit(&first).await.unwrap();
        assert_eq!(bus.committed_offset("g", 0), Some(1));

        let mut again = bus.connector("g", true).connect().await.unwrap();
        assert_eq!(again.next_message().await.unwrap().unwrap().payload, b"b");
    }

    #[tokio::test]
    async fn groups_commit_independently() {
        let bus = MemoryBus::new("t", 1);
        let mut a = bus.connector("a", true).connect().await.unwrap();
        bus.publish(None, b"x").await.unwrap();
        let msg = a.next_message().await.unwrap().unwrap();
        a.commit(&msg).await.unwrap();

        assert_eq!(bus.committed_offset("a", 0), Some(1));
        assert_eq!(bus.committed_offset("b", 0), None);
    }

    #[tokio::test]
    async fn keyed_records_keep_partition_order() {
        let bus = MemoryBus::new("t", 4);
        let mut sub = bus.connector("g", true).connect().await.unwrap();
        for i in 0..10 {
            bus.publish(Some("BTC"), format!("{i}").as_bytes()).await.unwrap();
        }
        let mut partition = None;
        for i in 0..10 {
            let msg = sub.next_message().await.unwrap().unwrap();
            assert_eq!(msg.payload, format!("{i}").into_bytes());
            assert!(partition.map_or(true, |p| p == msg.partition));
            partition = Some(msg.partition);
        }
        assert_eq!(bus.len(), 10);
    }

    #[tokio::test]
    async fn scripted_connect_failures() {
        let bus = MemoryBus::new("t", 1);
        bus.fail_next_connects(2);
        let connector = bus.connector("g", false);
        assert!(matches!(connector.connect().await, Err(BusError::Connect(_))));
        assert!(matches!(connector.connect().await, Err(BusError::Connect(_))));
        assert!(connector.connect().await.is_ok());
    }

    #[tokio::test]
    async fn disconnect_wakes_pending_receive() {
        let bus = MemoryBus::new("t", 1);
        let mut sub = bus.connector("g", false).connect().await.unwrap();
        let pending = tokio::spawn(async move { sub.next_message().await });
        tokio::task::yield_now().await;
        bus.disconnect();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(BusError::Receive(_))));
    }
}

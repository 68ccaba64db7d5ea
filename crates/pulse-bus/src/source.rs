//! Seams between the consumer loop and a concrete bus.

use async_trait::async_trait;

use crate::error::BusError;

/// One record pulled from the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Establishes a subscription to the configured topic.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Connect and subscribe. Each call yields a fresh subscription.
    async fn connect(&self) -> Result<Box<dyn BusSubscription>, BusError>;
}

/// A live subscription owned by the consumer task.
#[async_trait]
pub trait BusSubscription: Send {
    /// Wait for the next message. `Ok(None)` means the subscription ended.
    async fn next_message(&mut self) -> Result<Option<BusMessage>, BusError>;

    /// Record `message` as processed for this consumer group.
    async fn commit(&mut self, message: &BusMessage) -> Result<(), BusError>;
}

/// Receives every consumed message before it is committed.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &BusMessage);
}

/// Publishes payloads to the configured topic.
#[async_trait]
pub trait BusProducer: Send + Sync {
    /// Resolves once the bus has accepted the record.
    async fn publish(&self, key: Option<&str>, payload: &[u8]) -> Result<(), BusError>;
}

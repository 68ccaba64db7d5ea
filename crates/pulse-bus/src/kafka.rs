//! Kafka adapter over `rdkafka`.
//!
//! Offsets are committed manually after the handler ran, never by the
//! client's auto-commit timer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pulse_settings::BusSettings;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::error::BusError;
use crate::source::{BusConnector, BusMessage, BusProducer, BusSubscription};

fn consumer_config(settings: &BusSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    let _ = config
        .set("bootstrap.servers", &settings.brokers)
        .set("group.id", &settings.group_id)
        .set("enable.auto.commit", "false")
        .set(
            "auto.offset.reset",
            if settings.from_beginning { "earliest" } else { "latest" },
        )
        .set(
            "socket.connection.setup.timeout.ms",
            settings.connection_timeout_ms.to_string(),
        )
        .set("socket.timeout.ms", settings.request_timeout_ms.to_string());
    config
}

/// Creates a fresh consumer group member on every connect.
pub struct KafkaConnector {
    settings: BusSettings,
}

impl KafkaConnector {
    /// Fails only when the client configuration itself is rejected.
    pub fn new(settings: BusSettings) -> Result<Self, BusError> {
        let _validated: StreamConsumer = consumer_config(&settings)
            .create()
            .map_err(|e| BusError::Config(e.to_string()))?;
        Ok(Self { settings })
    }
}

#[async_trait]
impl BusConnector for KafkaConnector {
    async fn connect(&self) -> Result<Box<dyn BusSubscription>, BusError> {
        let consumer: StreamConsumer = consumer_config(&self.settings)
            .create()
            .map_err(|e| BusError::Config(e.to_string()))?;
        let consumer = Arc::new(consumer);

        // Metadata fetch is the only call that proves the brokers are
        // reachable; it blocks, so keep it off the runtime threads.
        let metadata_client = Arc::clone(&consumer);
        let topic = self.settings.topic.clone();
        let timeout = Duration::from_millis(self.settings.connection_timeout_ms);
        let _metadata = tokio::task::spawn_blocking(move || {
            metadata_client.fetch_metadata(Some(topic.as_str()), timeout)
        })
        .await
        .map_err(|e| BusError::Connect(e.to_string()))?
        .map_err(|e| BusError::Connect(e.to_string()))?;

        consumer
            .subscribe(&[self.settings.topic.as_str()])
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        info!(
            brokers = %self.settings.brokers,
            topic = %self.settings.topic,
            group_id = %self.settings.group_id,
            "kafka subscription established"
        );
        Ok(Box::new(KafkaSubscription { consumer }))
    }
}

struct KafkaSubscription {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl BusSubscription for KafkaSubscription {
    async fn next_message(&mut self) -> Result<Option<BusMessage>, BusError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BusError::Receive(e.to_string()))?;
        Ok(Some(BusMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().unwrap_or_default().to_vec(),
        }))
    }

    async fn commit(&mut self, message: &BusMessage) -> Result<(), BusError> {
        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(&message.topic, message.partition, Offset::Offset(message.offset + 1))
            .map_err(|e| BusError::Commit(e.to_string()))?;
        self.consumer
            .commit(&positions, CommitMode::Async)
            .map_err(|e| BusError::Commit(e.to_string()))
    }
}

/// Producer used by `pulse produce`.
pub struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaProducer {
    pub fn new(settings: &BusSettings) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", settings.request_timeout_ms.to_string())
            .create()
            .map_err(|e| BusError::Config(e.to_string()))?;
        Ok(Self {
            producer,
            topic: settings.topic.clone(),
            timeout: Duration::from_millis(settings.request_timeout_ms),
        })
    }
}

#[async_trait]
impl BusProducer for KafkaProducer {
    async fn publish(&self, key: Option<&str>, payload: &[u8]) -> Result<(), BusError> {
        let mut record = FutureRecord::<str, [u8]>::to(&self.topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }
        let (partition, offset) = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| BusError::Publish(e.to_string()))?;
        debug!(partition, offset, "record delivered");
        Ok(())
    }
}

//! Upstream bus access for the relay.
//!
//! [`BusConsumer`] drives any [`BusConnector`] through the reconnect state
//! machine and hands each message to a [`MessageHandler`]. Two buses ship:
//! [`MemoryBus`] (always available) and, behind the `kafka` feature,
//! [`kafka::KafkaConnector`].

#![deny(unsafe_code)]

pub mod backoff;
pub mod consumer;
pub mod error;
pub mod feed;
pub mod memory;
pub mod source;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use backoff::BackoffPolicy;
pub use consumer::{BusConsumer, ConsumerState, ConsumerStats};
pub use error::BusError;
pub use feed::DemoFeed;
pub use memory::{MemoryBus, MemoryConnector};
pub use source::{BusConnector, BusMessage, BusProducer, BusSubscription, MessageHandler};

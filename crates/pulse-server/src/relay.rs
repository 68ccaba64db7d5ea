//! Bus message → normalized event → broadcast.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use pulse_bus::{BusMessage, MessageHandler};
use pulse_core::normalize;
use pulse_telemetry::names;
use tracing::debug;

use crate::broadcast::{Broadcaster, DeliveryReport};

/// The consumer-side half of the relay.
pub struct RelayHandler {
    broadcaster: Arc<Broadcaster>,
}

impl RelayHandler {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }

    pub fn relay(&self, message: &BusMessage) -> DeliveryReport {
        let event = normalize(&message.payload);
        if event.is_unknown() {
            counter!(names::EVENTS_UNKNOWN_TOTAL).increment(1);
            debug!(
                partition = message.partition,
                offset = message.offset,
                "payload carried no usable subject"
            );
        }

        let report = self.broadcaster.broadcast(&event);
        counter!(names::EVENTS_BROADCAST_TOTAL).increment(1);
        debug!(
            subject = %event.subject,
            value = event.value,
            partition = message.partition,
            offset = message.offset,
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            "event broadcast"
        );
        report
    }
}

#[async_trait]
impl MessageHandler for RelayHandler {
    async fn handle(&self, message: &BusMessage) {
        let _ = self.relay(message);
    }
}

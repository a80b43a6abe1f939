//! Transport trait definitions and message types
//!
//! Broker clients (Kafka, Pub/Sub, the in-memory broker) implement these
//! traits. Partitioning, retries and connection handling stay inside the
//! client.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::TransportError;
use crate::envelope::Headers;

/// A framed message ready to be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    /// Message key: the envelope's object id.
    pub key: String,
    /// Wire-framed body.
    pub body: Vec<u8>,
    pub headers: Headers,
}

/// Broker acknowledgment of a produced message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for DeliveryReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Delivered message to topic {} [{}] at offset {}",
            self.topic, self.partition, self.offset
        )
    }
}

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Transport-assigned id, used to acknowledge.
    pub id: String,
    pub key: Option<String>,
    pub body: Vec<u8>,
    pub headers: Headers,
    /// 1 on first delivery, incremented on each redelivery.
    pub delivery_attempt: u32,
}

/// Producer side of a broker client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Produce a message and wait for the broker to acknowledge it.
    async fn produce(&self, message: OutboundMessage) -> Result<DeliveryReceipt, TransportError>;
}

/// Consumer side of a broker client.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Subscription name.
    fn name(&self) -> &str;

    /// Wait for the next message. `None` once the subscription is closed
    /// and drained.
    async fn recv(&self) -> Result<Option<InboundMessage>, TransportError>;

    /// Mark a message consumed. Unacknowledged messages are subject to the
    /// transport's redelivery policy.
    async fn ack(&self, message: &InboundMessage) -> Result<(), TransportError>;
}

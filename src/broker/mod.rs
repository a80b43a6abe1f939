//! Broker transport layer
//!
//! Defines the transport interface publishers and subscribers talk to, and
//! an in-process broker used for tests and demos.

pub mod memory;
pub mod transport;

pub use memory::{MemoryBroker, MemorySubscription};
pub use transport::{DeliveryReceipt, InboundMessage, OutboundMessage, Subscription, Transport};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Unknown message {0}")]
    UnknownMessage(String),

    #[error("Subscription closed")]
    Closed,

    #[error(transparent)]
    Client(#[from] anyhow::Error),
}

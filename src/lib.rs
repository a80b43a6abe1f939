// eventwire - typed domain events over schema-registry framed brokers

extern crate self as eventwire;

pub mod broker;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod publisher;
pub mod registry;
pub mod router;
pub mod schema;
pub mod subscriber;
pub mod wire;

pub use eventwire_derive::Describe;

pub use broker::{DeliveryReceipt, InboundMessage, OutboundMessage, Subscription, Transport, TransportError};
pub use codec::{AvroCodec, CborCodec, Codec, CodecError, JsonCodec};
pub use config::{ConfigError, EventwireConfig, PublisherConfig, RegistryConfig, SubscriberConfig};
pub use envelope::{Envelope, Headers, Metadata, MetadataError};
pub use publisher::{PublishError, PublishHandle, Publisher};
pub use registry::{CachedRegistry, HttpRegistry, MemoryRegistry, RegistryError, SchemaRegistry};
pub use router::{Handler, Resolution, Router, RouterError, Verdict};
pub use schema::{Schema, SchemaError, TypeDescriptor};
pub use subscriber::{DispatchError, SubscribeError, Subscriber};
pub use wire::WireError;

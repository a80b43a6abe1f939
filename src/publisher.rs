//! Publisher
//!
//! A publisher is bound to one topic and one registered payload type. Every
//! publish validates the envelope before any I/O:
//!
//! 1. the payload's descriptor must equal the registered one (references,
//!    boxes and other wrappers are transparent),
//! 2. the metadata must be complete,
//! 3. the body is encoded with the publisher's codec.
//!
//! The transport round trip then registers the schema (subject
//! `<topic>-value`), frames the body with the returned id and produces it,
//! keyed by the envelope's object id.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use log::{debug, info};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::broker::{DeliveryReceipt, OutboundMessage, Transport, TransportError};
use crate::codec::{Codec, CodecError, JsonCodec};
use crate::config::{ConfigError, PublisherConfig};
use crate::envelope::{Envelope, Headers, MetadataError};
use crate::registry::{subject_for, RegistryError, SchemaRegistry};
use crate::schema::{compile, walk, Describe, Schema, SchemaError, TypeDescriptor};
use crate::wire;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Invalid publisher configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Unsupported payload type: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid payload type: expected {expected}, found {found}")]
    InvalidPayloadType { expected: String, found: String },

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(#[from] MetadataError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] CodecError),

    #[error("Schema registry error for subject {subject}: {source}")]
    Registry {
        subject: String,
        source: RegistryError,
    },

    #[error("Transport error on topic {topic}: {source}")]
    Transport {
        topic: String,
        source: TransportError,
    },

    #[error("Publish canceled")]
    Canceled,
}

/// State shared between a publisher and its in-flight deliveries.
struct Shared {
    topic: String,
    subject: String,
    schema: Arc<Schema>,
    transport: Arc<dyn Transport>,
    registry: Arc<dyn SchemaRegistry>,
    delivery_timeout: Option<Duration>,
}

/// A validated, encoded message waiting for its schema id.
struct Prepared {
    key: String,
    body: Vec<u8>,
    headers: Headers,
}

impl Shared {
    async fn deliver(&self, prepared: Prepared) -> Result<DeliveryReceipt, PublishError> {
        let schema_id = self
            .registry
            .register_schema(&self.subject, &self.schema)
            .await
            .map_err(|source| PublishError::Registry {
                subject: self.subject.clone(),
                source,
            })?;

        let message = OutboundMessage {
            topic: self.topic.clone(),
            key: prepared.key,
            body: wire::encode(schema_id, &prepared.body),
            headers: prepared.headers,
        };
        let receipt = self
            .transport
            .produce(message)
            .await
            .map_err(|source| PublishError::Transport {
                topic: self.topic.clone(),
                source,
            })?;
        debug!("{} (schema id {})", receipt, schema_id);
        Ok(receipt)
    }

    /// Deliver unless canceled or past the delivery timeout first.
    async fn deliver_until(
        &self,
        cancel: &CancellationToken,
        prepared: Prepared,
    ) -> Result<DeliveryReceipt, PublishError> {
        let delivery = async {
            match self.delivery_timeout {
                Some(timeout) => tokio::time::timeout(timeout, self.deliver(prepared))
                    .await
                    .unwrap_or(Err(PublishError::Canceled)),
                None => self.deliver(prepared).await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PublishError::Canceled),
            result = delivery => result,
        }
    }
}

/// Publishes envelopes whose payload has the shape of `T`.
pub struct Publisher<T, C = JsonCodec> {
    shared: Arc<Shared>,
    descriptor: TypeDescriptor,
    codec: C,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Describe, C: Codec> Publisher<T, C> {
    /// Validate the configuration, then infer and compile the schema of `T`.
    ///
    /// Fails with `UnsupportedRootType` unless `T` is a record or a
    /// string-keyed map.
    pub fn new(
        config: PublisherConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn SchemaRegistry>,
        codec: C,
    ) -> Result<Self, PublishError> {
        config.validate()?;
        let descriptor = walk::<T>()?;
        let schema = compile(&descriptor)?;
        info!(
            "Publisher for topic {} registered schema: {}",
            config.topic, schema
        );

        Ok(Self {
            shared: Arc::new(Shared {
                subject: subject_for(&config.topic),
                delivery_timeout: config.delivery_timeout(),
                topic: config.topic,
                schema: Arc::new(schema),
                transport,
                registry,
            }),
            descriptor,
            codec,
            _payload: PhantomData,
        })
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    /// Registry subject the schema is registered under.
    pub fn subject(&self) -> &str {
        &self.shared.subject
    }

    pub fn schema(&self) -> &Schema {
        &self.shared.schema
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    fn prepare<P>(&self, envelope: &Envelope<P>) -> Result<Prepared, PublishError>
    where
        P: Describe + Serialize,
    {
        let found = walk::<P>().map_err(|e| PublishError::InvalidPayloadType {
            expected: self.descriptor.to_string(),
            found: e.to_string(),
        })?;
        if found != self.descriptor {
            return Err(PublishError::InvalidPayloadType {
                expected: self.descriptor.to_string(),
                found: found.to_string(),
            });
        }

        // `Option` is transparent to the walker; an absent root has no shape.
        if serde_json::to_value(&envelope.payload)
            .map_err(CodecError::from)?
            .is_null()
        {
            return Err(PublishError::InvalidPayloadType {
                expected: self.descriptor.to_string(),
                found: "null".to_string(),
            });
        }

        envelope.metadata.validate()?;
        let body = self.codec.encode(&self.shared.schema, &envelope.payload)?;

        Ok(Prepared {
            key: envelope.metadata.object_id.clone(),
            body,
            headers: envelope.metadata.to_headers(),
        })
    }

    /// Publish and wait for the broker to acknowledge.
    pub async fn publish_sync<P>(
        &self,
        cancel: &CancellationToken,
        envelope: &Envelope<P>,
    ) -> Result<DeliveryReceipt, PublishError>
    where
        P: Describe + Serialize,
    {
        let prepared = self.prepare(envelope)?;
        self.shared.deliver_until(cancel, prepared).await
    }

    /// Validate and encode now; run the broker round trip on a spawned task.
    ///
    /// Validation and encoding errors are returned directly. Everything after
    /// that, including cancellation, resolves the returned handle.
    pub fn publish_async<P>(
        &self,
        cancel: &CancellationToken,
        envelope: &Envelope<P>,
    ) -> Result<PublishHandle, PublishError>
    where
        P: Describe + Serialize,
    {
        let prepared = self.prepare(envelope)?;
        let shared = Arc::clone(&self.shared);
        let cancel = cancel.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = shared.deliver_until(&cancel, prepared).await;
            // The caller may have dropped the handle; nothing to report then.
            let _ = tx.send(result);
        });

        Ok(PublishHandle { rx })
    }
}

impl<T, C: Clone> Clone for Publisher<T, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            descriptor: self.descriptor.clone(),
            codec: self.codec.clone(),
            _payload: PhantomData,
        }
    }
}

/// Completion handle of an asynchronous publish. Resolves exactly once.
#[derive(Debug)]
pub struct PublishHandle {
    rx: oneshot::Receiver<Result<DeliveryReceipt, PublishError>>,
}

impl Future for PublishHandle {
    type Output = Result<DeliveryReceipt, PublishError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(PublishError::Canceled)))
    }
}

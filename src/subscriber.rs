//! Subscriber
//!
//! Rebuilds typed envelopes from transport messages and drives them through
//! the dispatch router. Per message:
//!
//! 1. unframe the body (`Malformed` on a bad frame),
//! 2. rebuild metadata from the headers,
//! 3. when a registry is attached, check that the frame's schema id
//!    resolves to the registered schema,
//! 4. decode the body into the registered payload type,
//! 5. dispatch and turn the handler's verdict into ack or no-ack.
//!
//! The delivery loop acknowledges only after the handler has returned.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::broker::{InboundMessage, Subscription, TransportError};
use crate::codec::{Codec, JsonCodec};
use crate::config::{ConfigError, SubscriberConfig};
use crate::envelope::{Envelope, Metadata, MetadataError};
use crate::registry::{RegistryError, SchemaRegistry};
use crate::router::{Handler, Resolution, Router, RouterError};
use crate::schema::{Describe, Schema, SchemaError};
use crate::wire::{self, WireError};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Malformed(#[from] WireError),

    #[error("Invalid metadata headers: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Payload does not match registered type {expected}: {reason}")]
    Mismatch { expected: String, reason: String },

    #[error("Schema registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl DispatchError {
    /// Messages that can never be processed, however often they are
    /// redelivered.
    pub fn is_poison(&self) -> bool {
        matches!(self, DispatchError::Malformed(_) | DispatchError::Metadata(_))
    }
}

#[derive(Error, Debug)]
pub enum SubscribeError {
    #[error("Invalid subscriber configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Unsupported payload type: {0}")]
    Schema(#[from] SchemaError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Receives envelopes whose payload is a `T`.
pub struct Subscriber<T, C = JsonCodec> {
    config: SubscriberConfig,
    schema: Arc<Schema>,
    router: Router<T>,
    codec: C,
    registry: Option<Arc<dyn SchemaRegistry>>,
}

impl<T, C> Subscriber<T, C>
where
    T: Describe + DeserializeOwned + Send + 'static,
    C: Codec,
{
    /// Validate the configuration, then infer and compile the schema of `T`.
    pub fn new(config: SubscriberConfig, codec: C) -> Result<Self, SubscribeError> {
        config.validate()?;
        let schema = Schema::of::<T>()?;
        debug!(
            "Subscriber {} expects schema: {}",
            config.subscription, schema
        );
        Ok(Self {
            config,
            schema: Arc::new(schema),
            router: Router::new(),
            codec,
            registry: None,
        })
    }

    /// Verify inbound schema ids against a registry.
    pub fn with_registry(mut self, registry: Arc<dyn SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register a handler for an event name; see [`Router::register`].
    pub fn register<H>(&mut self, event_name: &str, handler: H) -> Result<(), RouterError>
    where
        H: Handler<T> + 'static,
    {
        self.router.register(event_name, handler)
    }

    pub fn router(&self) -> &Router<T> {
        &self.router
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn mismatch(&self, reason: impl Into<String>) -> DispatchError {
        DispatchError::Mismatch {
            expected: self.schema.name().to_string(),
            reason: reason.into(),
        }
    }

    /// Rebuild the typed envelope carried by a transport message.
    pub async fn reconstruct(&self, message: &InboundMessage) -> Result<Envelope<T>, DispatchError> {
        let (schema_id, body) = wire::decode(&message.body)?;
        let metadata = Metadata::from_headers(&message.headers)?;

        if let Some(registry) = &self.registry {
            let writer = registry.schema_by_id(schema_id).await?;
            if writer.fingerprint() != self.schema.fingerprint() {
                return Err(self.mismatch(format!(
                    "schema id {} is {}",
                    schema_id,
                    writer.canonical_text()
                )));
            }
        }

        let payload: T = self
            .codec
            .decode(&self.schema, body)
            .map_err(|e| self.mismatch(e.to_string()))?;
        Ok(Envelope::new(payload, metadata))
    }

    /// Reconstruct and dispatch one message.
    pub async fn process(&self, message: &InboundMessage) -> Result<Resolution, DispatchError> {
        let envelope = self.reconstruct(message).await?;
        if self.config.verbose {
            info!(
                "Dispatching event '{}' for object {} (message {})",
                envelope.metadata.event_name, envelope.metadata.object_id, message.id
            );
        }
        Ok(self.router.dispatch(envelope).await)
    }

    /// Consume a subscription until it closes or `cancel` fires.
    ///
    /// Malformed messages are acknowledged and dropped. A payload that does
    /// not match the registered type stops the loop with an error and is
    /// left unacknowledged. Registry failures leave the message for
    /// redelivery and the loop continues.
    pub async fn subscribe(
        &self,
        subscription: &dyn Subscription,
        cancel: &CancellationToken,
    ) -> Result<(), SubscribeError> {
        info!(
            "Subscriber {} listening on {} ({} handlers)",
            self.config.subscription,
            subscription.name(),
            self.router.len()
        );

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Subscriber {} stopped", self.config.subscription);
                    return Ok(());
                }
                received = subscription.recv() => received?,
            };
            let message = match received {
                Some(message) => message,
                None => {
                    info!("Subscription {} closed", subscription.name());
                    return Ok(());
                }
            };

            if self.config.verbose {
                info!(
                    "Received message {} (attempt {})",
                    message.id, message.delivery_attempt
                );
            }

            match self.process(&message).await {
                Ok(Resolution::Ack) => subscription.ack(&message).await?,
                Ok(Resolution::NoAck) => {
                    debug!("Message {} not acknowledged", message.id);
                }
                Err(e) if e.is_poison() => {
                    warn!("Dropping message {}: {}", message.id, e);
                    subscription.ack(&message).await?;
                }
                Err(DispatchError::Registry(e)) => {
                    warn!("Message {} left for redelivery: {}", message.id, e);
                }
                Err(e) => {
                    error!("Message {} rejected: {}", message.id, e);
                    return Err(e.into());
                }
            }
        }
    }
}

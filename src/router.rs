//! Dispatch router
//!
//! Maps event names to handlers for one payload type. Whether a message is
//! acknowledged is decided only by the handler's verdict; messages with an
//! event name nobody registered are acknowledged and dropped.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use thiserror::Error;

use crate::envelope::Envelope;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Event name must not be empty")]
    EmptyEventName,
}

/// A handler's decision on one message.
///
/// `ack` alone decides acknowledgment. An attached error is logged but does
/// not change the outcome: a handler may acknowledge a message it failed to
/// process so that it is not redelivered.
pub struct Verdict {
    pub ack: bool,
    pub error: Option<anyhow::Error>,
}

impl Verdict {
    pub fn new(ack: bool, error: Option<anyhow::Error>) -> Self {
        Self { ack, error }
    }

    pub fn ack() -> Self {
        Self::new(true, None)
    }

    pub fn nack() -> Self {
        Self::new(false, None)
    }

    pub fn with_error(mut self, error: impl Into<anyhow::Error>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl From<bool> for Verdict {
    fn from(ack: bool) -> Self {
        Self::new(ack, None)
    }
}

impl fmt::Debug for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verdict")
            .field("ack", &self.ack)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

/// What the transport should do with a dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Ack,
    NoAck,
}

impl Resolution {
    pub fn is_ack(self) -> bool {
        self == Resolution::Ack
    }
}

impl From<bool> for Resolution {
    fn from(ack: bool) -> Self {
        if ack {
            Resolution::Ack
        } else {
            Resolution::NoAck
        }
    }
}

/// Handles envelopes of one event name.
///
/// Implemented for any `Fn(Envelope<T>) -> impl Future<Output = Verdict>`,
/// so async closures can be registered directly.
#[async_trait]
pub trait Handler<T>: Send + Sync {
    async fn handle(&self, envelope: Envelope<T>) -> Verdict;
}

#[async_trait]
impl<T, F, Fut> Handler<T> for F
where
    T: Send + 'static,
    F: Fn(Envelope<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Verdict> + Send,
{
    async fn handle(&self, envelope: Envelope<T>) -> Verdict {
        (self)(envelope).await
    }
}

/// Event-name keyed handler table.
pub struct Router<T> {
    handlers: HashMap<String, Arc<dyn Handler<T>>>,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<T: Send + 'static> Router<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event name. The first handler registered
    /// for a name keeps it; later registrations are ignored with a warning.
    pub fn register<H>(&mut self, event_name: &str, handler: H) -> Result<(), RouterError>
    where
        H: Handler<T> + 'static,
    {
        if event_name.trim().is_empty() {
            return Err(RouterError::EmptyEventName);
        }
        match self.handlers.entry(event_name.to_string()) {
            Entry::Occupied(_) => {
                warn!(
                    "Handler for event '{}' already registered, ignoring the new one",
                    event_name
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(handler));
            }
        }
        Ok(())
    }

    pub fn contains(&self, event_name: &str) -> bool {
        self.handlers.contains_key(event_name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered event names, sorted.
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Route an envelope to the handler registered for its event name and
    /// wait for the verdict.
    pub async fn dispatch(&self, envelope: Envelope<T>) -> Resolution {
        let event_name = envelope.metadata.event_name.clone();
        let handler = match self.handlers.get(&event_name) {
            Some(handler) => Arc::clone(handler),
            None => {
                warn!(
                    "No handler for event '{}' (object {}), dropping",
                    event_name, envelope.metadata.object_id
                );
                return Resolution::Ack;
            }
        };

        let verdict = handler.handle(envelope).await;
        if let Some(error) = &verdict.error {
            warn!("Handler for event '{}' reported: {:#}", event_name, error);
        }
        debug!("Event '{}' handled, ack={}", event_name, verdict.ack);
        Resolution::from(verdict.ack)
    }
}

//! Event envelopes
//!
//! An [`Envelope`] is the unit exchanged with a broker: a typed payload plus
//! [`Metadata`] describing the event. Metadata travels out-of-band in the
//! transport's header carrier.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Transport metadata carrier (Kafka headers, Pub/Sub attributes, ...).
pub type Headers = BTreeMap<String, String>;

/// Header names used for metadata.
pub mod header {
    pub const USER_ID: &str = "user_id";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const EVENT_NAME: &str = "event_name";
    pub const ORIGIN: &str = "origin";
    pub const TIMESTAMP: &str = "timestamp";
    pub const OBJECT_ID: &str = "object_id";
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Missing required metadata field {0}")]
    Missing(&'static str),

    #[error("Invalid timestamp header {0:?}")]
    InvalidTimestamp(String),
}

/// Event metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// User that triggered the event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Unique id of the event, generated when it is first triggered.
    pub correlation_id: String,
    /// Event name; origin and destination are implicit in topic and `origin`.
    pub event_name: String,
    /// Service originating the event.
    pub origin: String,
    /// Moment the event was generated, epoch millis.
    pub timestamp: i64,
    /// Id of the object the event is about; also the message key.
    pub object_id: String,
}

impl Metadata {
    /// Fresh metadata with a random correlation id and the current time.
    pub fn new(
        event_name: impl Into<String>,
        origin: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: None,
            correlation_id: Uuid::new_v4().to_string(),
            event_name: event_name.into(),
            origin: origin.into(),
            timestamp: Utc::now().timestamp_millis(),
            object_id: object_id.into(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Keep the correlation id of an upstream event.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Check that every required field is set.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.correlation_id.is_empty() {
            return Err(MetadataError::Missing(header::CORRELATION_ID));
        }
        if self.event_name.is_empty() {
            return Err(MetadataError::Missing(header::EVENT_NAME));
        }
        if self.origin.is_empty() {
            return Err(MetadataError::Missing(header::ORIGIN));
        }
        if self.timestamp == 0 {
            return Err(MetadataError::Missing(header::TIMESTAMP));
        }
        if self.object_id.is_empty() {
            return Err(MetadataError::Missing(header::OBJECT_ID));
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.validate().is_ok()
    }

    /// Render as header entries. `user_id` is only written when present.
    pub fn to_headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert(header::CORRELATION_ID.into(), self.correlation_id.clone());
        headers.insert(header::EVENT_NAME.into(), self.event_name.clone());
        headers.insert(header::ORIGIN.into(), self.origin.clone());
        headers.insert(header::OBJECT_ID.into(), self.object_id.clone());
        headers.insert(header::TIMESTAMP.into(), self.timestamp.to_string());
        if let Some(user_id) = self.user_id.as_ref().filter(|u| !u.is_empty()) {
            headers.insert(header::USER_ID.into(), user_id.clone());
        }
        headers
    }

    /// Rebuild metadata from header entries.
    ///
    /// Absent entries come back empty (timestamp 0); only a timestamp that is
    /// present but not a decimal integer is an error.
    pub fn from_headers(headers: &Headers) -> Result<Self, MetadataError> {
        let get = |key: &str| headers.get(key).cloned().unwrap_or_default();

        let timestamp = match headers.get(header::TIMESTAMP) {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| MetadataError::InvalidTimestamp(raw.clone()))?,
            None => 0,
        };

        Ok(Self {
            user_id: headers
                .get(header::USER_ID)
                .filter(|u| !u.is_empty())
                .cloned(),
            correlation_id: get(header::CORRELATION_ID),
            event_name: get(header::EVENT_NAME),
            origin: get(header::ORIGIN),
            timestamp,
            object_id: get(header::OBJECT_ID),
        })
    }
}

/// A payload with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub payload: P,
    pub metadata: Metadata,
}

impl<P> Envelope<P> {
    pub fn new(payload: P, metadata: Metadata) -> Self {
        Self { payload, metadata }
    }

    pub fn event_name(&self) -> &str {
        &self.metadata.event_name
    }

    /// Borrow the payload, keeping the metadata.
    pub fn by_ref(&self) -> Envelope<&P> {
        Envelope {
            payload: &self.payload,
            metadata: self.metadata.clone(),
        }
    }
}

impl<P: Serialize> fmt::Display for Envelope<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

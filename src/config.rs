//! Configuration
//!
//! All settings are plain serde structs, loadable from a JSON file:
//!
//! ```json
//! {
//!   "registry": { "urls": "http://registry-a:8081,http://registry-b:8081" },
//!   "publisher": { "topic": "books", "delivery_timeout_ms": 5000 },
//!   "subscriber": { "subscription": "books-replica", "verbose": true }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Publisher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub topic: String,
    /// Upper bound on one publish round trip. `None` waits for the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_timeout_ms: Option<u64>,
}

impl PublisherConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            delivery_timeout_ms: None,
        }
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn delivery_timeout(&self) -> Option<Duration> {
        self.delivery_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("publisher topic is empty".to_string()));
        }
        if self.delivery_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("delivery timeout must be positive".to_string()));
        }
        Ok(())
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    pub subscription: String,
    /// Log every received message at info level.
    #[serde(default)]
    pub verbose: bool,
}

impl SubscriberConfig {
    pub fn new(subscription: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subscription.trim().is_empty() {
            return Err(ConfigError::Invalid("subscription name is empty".to_string()));
        }
        Ok(())
    }
}

/// Schema registry endpoints, tried in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// A list of base URLs, or a single comma-separated string.
    #[serde(deserialize_with = "url_list")]
    pub urls: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl RegistryConfig {
    /// Parse a comma-separated address list, e.g. `"http://a:8081,http://b:8081"`.
    pub fn from_addresses(addresses: &str) -> Self {
        Self {
            urls: split_urls(addresses),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::Invalid("no schema registry urls".to_string()));
        }
        Ok(())
    }
}

fn split_urls(addresses: &str) -> Vec<String> {
    addresses
        .split(',')
        .map(|url| url.trim().trim_end_matches('/'))
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

fn url_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Urls {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match Urls::deserialize(deserializer)? {
        Urls::Joined(joined) => split_urls(&joined),
        Urls::List(list) => list.iter().flat_map(|url| split_urls(url)).collect(),
    })
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventwireConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<PublisherConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber: Option<SubscriberConfig>,
}

impl EventwireConfig {
    /// Load and validate a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(registry) = &self.registry {
            registry.validate()?;
        }
        if let Some(publisher) = &self.publisher {
            publisher.validate()?;
        }
        if let Some(subscriber) = &self.subscriber {
            subscriber.validate()?;
        }
        Ok(())
    }
}

//! Schema registry clients
//!
//! Publishers register their compiled schema under the subject
//! `<topic>-value` and frame every message with the returned id.
//! Subscribers resolve ids back to schemas to verify what they receive.

pub mod cached;
pub mod http;
pub mod memory;

pub use cached::CachedRegistry;
pub use http::HttpRegistry;
pub use memory::MemoryRegistry;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::schema::{Schema, SchemaError};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Schema {0} not found")]
    SchemaNotFound(u32),

    #[error("No registry endpoints configured")]
    NoEndpoints,

    #[error("Invalid registry URL {0}")]
    InvalidUrl(String),

    #[error("Registry returned an invalid schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// Subject a topic's value schema is registered under.
pub fn subject_for(topic: &str) -> String {
    format!("{}-value", topic)
}

#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Register a schema under a subject and return its id. Registering an
    /// already known schema returns the existing id.
    async fn register_schema(&self, subject: &str, schema: &Schema) -> Result<u32, RegistryError>;

    /// Fetch a schema by id.
    async fn schema_by_id(&self, id: u32) -> Result<Schema, RegistryError>;
}

#[async_trait]
impl<R: SchemaRegistry + ?Sized> SchemaRegistry for Arc<R> {
    async fn register_schema(&self, subject: &str, schema: &Schema) -> Result<u32, RegistryError> {
        (**self).register_schema(subject, schema).await
    }

    async fn schema_by_id(&self, id: u32) -> Result<Schema, RegistryError> {
        (**self).schema_by_id(id).await
    }
}

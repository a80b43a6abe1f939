//! Caching registry decorator

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;

use super::{RegistryError, SchemaRegistry};
use crate::schema::Schema;

/// Caches registrations by subject and schema fingerprint, and lookups by
/// id. The cache lives as long as this instance; errors are never cached.
pub struct CachedRegistry<R> {
    inner: R,
    ids: RwLock<HashMap<(String, String), u32>>,
    schemas: RwLock<HashMap<u32, Schema>>,
}

impl<R: SchemaRegistry> CachedRegistry<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            ids: RwLock::new(HashMap::new()),
            schemas: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &R {
        &self.inner
    }

    pub async fn cached_ids(&self) -> usize {
        self.ids.read().await.len()
    }
}

#[async_trait]
impl<R: SchemaRegistry> SchemaRegistry for CachedRegistry<R> {
    async fn register_schema(&self, subject: &str, schema: &Schema) -> Result<u32, RegistryError> {
        let key = (subject.to_string(), schema.fingerprint());
        if let Some(id) = self.ids.read().await.get(&key) {
            return Ok(*id);
        }

        let id = self.inner.register_schema(subject, schema).await?;
        debug!("Cached schema id {} for subject {}", id, subject);
        self.ids.write().await.insert(key, id);
        self.schemas.write().await.entry(id).or_insert_with(|| schema.clone());
        Ok(id)
    }

    async fn schema_by_id(&self, id: u32) -> Result<Schema, RegistryError> {
        if let Some(schema) = self.schemas.read().await.get(&id) {
            return Ok(schema.clone());
        }

        let schema = self.inner.schema_by_id(id).await?;
        self.schemas.write().await.insert(id, schema.clone());
        Ok(schema)
    }
}

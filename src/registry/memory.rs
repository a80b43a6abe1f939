//! In-process schema registry

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::debug;

use super::{RegistryError, SchemaRegistry};
use crate::schema::Schema;

#[derive(Default)]
struct Inner {
    /// fingerprint -> id
    ids: HashMap<String, u32>,
    schemas: HashMap<u32, Schema>,
    /// subject -> registered ids, in registration order
    subjects: HashMap<String, Vec<u32>>,
}

/// Assigns ids sequentially from 1, one per distinct schema. The same
/// schema registered under several subjects keeps a single id.
pub struct MemoryRegistry {
    inner: Mutex<Inner>,
    register_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
    available: AtomicBool,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            register_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), RegistryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::Unavailable("memory registry offline".to_string()))
        }
    }

    /// Make subsequent calls fail with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn register_count(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_count(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    /// Ids registered under a subject.
    pub fn versions(&self, subject: &str) -> Vec<u32> {
        self.inner().subjects.get(subject).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SchemaRegistry for MemoryRegistry {
    async fn register_schema(&self, subject: &str, schema: &Schema) -> Result<u32, RegistryError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut inner = self.inner();
        let fingerprint = schema.fingerprint();
        let id = match inner.ids.get(&fingerprint) {
            Some(id) => *id,
            None => {
                let id = inner.schemas.len() as u32 + 1;
                inner.ids.insert(fingerprint, id);
                inner.schemas.insert(id, schema.clone());
                debug!("Registered schema {} as id {}", schema.name(), id);
                id
            }
        };
        let versions = inner.subjects.entry(subject.to_string()).or_default();
        if !versions.contains(&id) {
            versions.push(id);
        }
        Ok(id)
    }

    async fn schema_by_id(&self, id: u32) -> Result<Schema, RegistryError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.inner()
            .schemas
            .get(&id)
            .cloned()
            .ok_or(RegistryError::SchemaNotFound(id))
    }
}

pub mod file;

use async_trait::async_trait;
use corral_core::InstanceEvent;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

pub use file::FileEventStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("corrupt event log for {instance_id}: {message}")]
    Corrupt { instance_id: String, message: String },
    #[error("lock poisoned")]
    LockPoisoned,
}

/// Durable, append-only log of lifecycle events, one stream per instance.
///
/// `append` must not return before the event is durable; callers treat an
/// error as "the transition was not recorded".
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: &InstanceEvent) -> Result<(), StoreError>;

    /// All events of an instance in append order. Unknown instances yield an empty log.
    async fn load(&self, instance_id: &str) -> Result<Vec<InstanceEvent>, StoreError>;

    async fn list_instances(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory implementation of the event store
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    storage: Arc<RwLock<HashMap<String, Vec<InstanceEvent>>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &InstanceEvent) -> Result<(), StoreError> {
        let mut storage = self.storage.write().map_err(|_| StoreError::LockPoisoned)?;
        storage
            .entry(event.instance_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> Result<Vec<InstanceEvent>, StoreError> {
        let storage = self.storage.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(storage.get(instance_id).cloned().unwrap_or_default())
    }

    async fn list_instances(&self) -> Result<Vec<String>, StoreError> {
        let storage = self.storage.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut ids: Vec<String> = storage.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

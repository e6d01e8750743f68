use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{QueueStore, Result, StoreError};
use crate::item::{BodyId, ItemId, QueueItem};

/// In-memory store
///
/// Nothing survives a restart; intended for tests and for queues whose
/// contents may be lost.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    bodies: Arc<DashMap<BodyId, Arc<[u8]>>>,
    items: Arc<DashMap<ItemId, QueueItem>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of stored message bodies
    #[must_use]
    pub fn bodies(&self) -> usize {
        self.bodies.len()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn write_body(&self, id: BodyId, body: &[u8]) -> Result<()> {
        self.bodies.insert(id, Arc::from(body));
        Ok(())
    }

    async fn read_body(&self, id: BodyId) -> Result<Arc<[u8]>> {
        self.bodies
            .get(&id)
            .map(|body| Arc::clone(body.value()))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete_body(&self, id: BodyId) -> Result<()> {
        self.bodies.remove(&id);
        Ok(())
    }

    async fn save(&self, item: &QueueItem) -> Result<()> {
        self.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn remove(&self, id: ItemId) -> Result<()> {
        self.items.remove(&id);
        Ok(())
    }

    async fn load(&self) -> Result<Vec<QueueItem>> {
        let mut items: Vec<QueueItem> = self
            .items
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by_key(|item| item.id);
        Ok(items)
    }
}

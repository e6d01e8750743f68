//! Persistence for queue items and message bodies.
//!
//! A body is stored once per enqueue and shared by the items of all its
//! recipients; items are rewritten on every state change.

mod file;
mod memory;

use std::{fmt::Debug, io, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::item::{BodyId, ItemId, QueueItem};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid queue location: {0}")]
    InvalidLocation(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Backing store of a delivery queue
#[async_trait]
pub trait QueueStore: Send + Sync + Debug {
    async fn write_body(&self, id: BodyId, body: &[u8]) -> Result<()>;

    async fn read_body(&self, id: BodyId) -> Result<Arc<[u8]>>;

    /// Removing a body that does not exist is not an error.
    async fn delete_body(&self, id: BodyId) -> Result<()>;

    /// Insert or replace an item.
    async fn save(&self, item: &QueueItem) -> Result<()>;

    /// Removing an item that does not exist is not an error.
    async fn remove(&self, id: ItemId) -> Result<()>;

    /// Every stored item, oldest first.
    async fn load(&self) -> Result<Vec<QueueItem>>;
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

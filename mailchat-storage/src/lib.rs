//! Account storage and local delivery for MailChat.
//!
//! `storage.memory` keeps accounts and their mailboxes in memory and accepts
//! deliveries for them. `storage.blob.fs` stores message bodies as files.

pub mod blob;
pub mod memory;

pub use blob::FsBlobStore;
pub use memory::{MemoryStorage, StoredMessage};

use mailchat_module::Registry;

/// Register `storage.memory` and `storage.blob.fs`.
pub fn register(registry: &mut Registry) {
    registry.register("storage.memory", MemoryStorage::factory);
    registry.register("storage.blob.fs", FsBlobStore::factory);
}

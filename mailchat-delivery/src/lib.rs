//! Queued delivery for MailChat.
//!
//! The `target.queue` module stores every accepted recipient as a queue item
//! and hands it to its target later, retrying temporary failures with
//! exponential backoff. Items that fail permanently, or run out of
//! attempts, are bounced to their sender through the bounce target.
//!
//! Per-destination concurrency and start-rate limits keep the queue from
//! flooding a single domain; items refused by a limit simply wait for a
//! later tick.

pub mod dsn;
pub mod error;
pub mod item;
pub mod limiter;
pub mod limits;
pub mod module;
pub mod queue;
pub mod retry;
pub mod store;

pub use dsn::{BounceReason, DsnConfig, generate_dsn, should_generate_dsn};
pub use error::{DeliveryError, PermanentError, SystemError, TemporaryError};
pub use item::{BodyId, ItemId, ItemState, QueueItem};
pub use limiter::{Blocked, Limiter, Permit};
pub use limits::{DestinationLimits, Limits, Rate};
pub use module::QueueModule;
pub use queue::{Queue, QueueConfig, QueueEvent};
pub use retry::RetryPolicy;
pub use store::{FileStore, MemoryStore, QueueStore, StoreError};

use mailchat_module::Registry;

/// Register `target.queue`.
pub fn register(registry: &mut Registry) {
    registry.register("target.queue", QueueModule::factory);
}

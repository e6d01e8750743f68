//! Queue items

use std::{fmt, time::SystemTime};

use mailchat_common::{Address, MessageId};
use serde::{Deserialize, Serialize};

/// Identifier of a queue item
///
/// One item exists per accepted recipient; the ULID doubles as the file name
/// of the item in the file store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(ulid::Ulid);

impl ItemId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Parse an identifier from a file name such as `01ARYZ6S41.bin`.
    ///
    /// Names containing path separators or `..` are refused.
    pub fn from_filename(filename: &str, extension: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(extension)?.strip_suffix('.')?;
        ulid::Ulid::from_string(stem).ok().map(Self)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a stored message body
///
/// Every enqueue stores its body under a fresh handle, so envelopes sharing
/// a message id but carrying different (rewritten) bodies never overwrite
/// each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyId(ulid::Ulid);

impl BodyId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    /// Waiting for `next_attempt_at`.
    Pending,
    /// An attempt is running.
    InFlight,
}

/// One recipient of an accepted message, waiting for delivery.
///
/// Delivered and bounced items leave the queue, so only the two live
/// states are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    /// Identifier of the accepted message, kept for logs and bounces.
    pub message_id: MessageId,
    pub body: BodyId,
    pub sender: Address,
    pub recipient: Address,
    /// Key the per-destination limits are applied to.
    pub destination: String,
    /// Failed attempts so far.
    pub attempt: u32,
    pub next_attempt_at: SystemTime,
    pub last_error: Option<String>,
    pub state: ItemState,
    pub queued_at: SystemTime,
}

impl QueueItem {
    /// A new pending item, due immediately.
    #[must_use]
    pub fn new(
        message_id: MessageId,
        body: BodyId,
        sender: Address,
        recipient: Address,
        now: SystemTime,
    ) -> Self {
        Self {
            id: ItemId::generate(),
            message_id,
            body,
            sender,
            destination: destination_key(&recipient),
            recipient,
            attempt: 0,
            next_attempt_at: now,
            last_error: None,
            state: ItemState::Pending,
            queued_at: now,
        }
    }

    #[must_use]
    pub fn is_due(&self, now: SystemTime) -> bool {
        self.state == ItemState::Pending && self.next_attempt_at <= now
    }
}

/// Destination key of a recipient: its lowercased domain, or an empty key
/// for local names without a domain.
#[must_use]
pub fn destination_key(recipient: &Address) -> String {
    recipient
        .domain()
        .map(|domain| domain.as_str().to_string())
        .unwrap_or_default()
}

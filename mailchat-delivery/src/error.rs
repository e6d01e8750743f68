//! Typed error handling for queued delivery.
//!
//! A failed attempt is classified as:
//! - Permanent: bounce the item, do not retry
//! - Temporary: retry with backoff until the attempts run out
//! - System: the queue itself failed (store, initialization)

use mailchat_common::{EnhancedCode, Reply, Status};
use mailchat_module::ModuleError;
use thiserror::Error;

use crate::store::StoreError;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Failure that will not go away by retrying (5xx replies).
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Failure worth retrying later (4xx replies, unavailable targets).
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// Internal error of the queue.
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Errors that should not be retried.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// The target refused the message for this recipient.
    #[error("{0}")]
    Rejected(Reply),

    /// The recipient does not exist at the target.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Delivery failed: {0}")]
    Failed(String),
}

/// Errors that should be retried with exponential backoff.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// The target deferred the message for this recipient.
    #[error("{0}")]
    Deferred(Reply),

    #[error("Target unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Queue store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue not initialized: {0}")]
    NotInitialized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Status line reported in bounces for this failure.
    #[must_use]
    pub fn reply(&self) -> Reply {
        match self {
            Self::Permanent(PermanentError::Rejected(reply))
            | Self::Temporary(TemporaryError::Deferred(reply)) => reply.clone(),
            Self::Permanent(PermanentError::InvalidRecipient(_)) => Reply::no_such_user(),
            Self::Permanent(PermanentError::Failed(message)) => Reply::new(
                Status::TransactionFailed,
                EnhancedCode(5, 0, 0),
                message.clone(),
            ),
            Self::Temporary(error) => Reply::new(
                Status::ActionUnavailable,
                EnhancedCode(4, 0, 0),
                error.to_string(),
            ),
            Self::System(error) => Reply::local_error(error.to_string()),
        }
    }
}

/// Classify the result a target returned for one recipient.
///
/// A deliberate [`ModuleError::Rejected`] keeps its reply and is classified
/// by its status class; the remaining variants map onto the queue's
/// taxonomy.
impl From<ModuleError> for DeliveryError {
    fn from(error: ModuleError) -> Self {
        match error {
            ModuleError::Rejected(reply) if reply.is_temporary() => {
                Self::Temporary(TemporaryError::Deferred(reply))
            }
            ModuleError::Rejected(reply) => Self::Permanent(PermanentError::Rejected(reply)),
            ModuleError::Temporary(message) => {
                Self::Temporary(TemporaryError::Unavailable(message))
            }
            ModuleError::Io(e) => Self::Temporary(TemporaryError::Io(e.to_string())),
            ModuleError::NotFound(recipient) => {
                Self::Permanent(PermanentError::InvalidRecipient(recipient))
            }
            error @ (ModuleError::Permanent(_)
            | ModuleError::AlreadyExists(_)
            | ModuleError::UnknownCredentials
            | ModuleError::Unsupported) => {
                Self::Permanent(PermanentError::Failed(error.to_string()))
            }
        }
    }
}

impl From<StoreError> for DeliveryError {
    fn from(error: StoreError) -> Self {
        Self::System(SystemError::Store(error))
    }
}

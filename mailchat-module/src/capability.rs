//! Capability interfaces a module can expose.
//!
//! Consumers ask for a capability when they resolve a reference; a module
//! that does not expose it is a configuration error at that directive.

use std::{sync::Arc, time::SystemTime};

use async_trait::async_trait;
use mailchat_common::{Address, Envelope, Reply};

use crate::{Module, ModuleError};

/// Outcome of delivering to a single recipient
pub type DeliveryResult = Result<(), ModuleError>;

/// Something a message can be handed to: local storage, a queue, another
/// pipeline.
#[async_trait]
pub trait Target: Send + Sync {
    /// Deliver `envelope` to `recipients`. The result has one entry per
    /// recipient, in the same order.
    async fn deliver(&self, envelope: &Envelope, recipients: &[Address])
    -> Vec<DeliveryResult>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Reply),
}

/// Inspects a message and accepts or refuses it. `Err` means the check
/// itself could not run.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, envelope: &Envelope) -> Result<Verdict, ModuleError>;
}

/// Rewrites parts of a message. Every hook defaults to leaving its input
/// untouched.
#[async_trait]
pub trait Modifier: Send + Sync {
    async fn rewrite_sender(&self, sender: &Address) -> Result<Address, ModuleError> {
        Ok(sender.clone())
    }

    /// Replace one recipient with zero or more recipients.
    async fn rewrite_recipient(&self, recipient: &Address) -> Result<Vec<Address>, ModuleError> {
        Ok(vec![recipient.clone()])
    }

    async fn rewrite_body(&self, _envelope: &mut Envelope) -> Result<(), ModuleError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub created_at: SystemTime,
}

/// Account storage
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_account(&self, name: &str) -> Result<Account, ModuleError>;

    async fn create_account(&self, name: &str) -> Result<(), ModuleError>;

    async fn delete_account(&self, name: &str) -> Result<(), ModuleError>;

    async fn list_accounts(&self) -> Result<Vec<String>, ModuleError>;
}

/// Credential verification, with optional user management
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Err(ModuleError::UnknownCredentials)` when the credentials are wrong.
    async fn authenticate(&self, username: &str, password: &str) -> Result<(), ModuleError>;

    async fn list_users(&self) -> Result<Vec<String>, ModuleError> {
        Err(ModuleError::Unsupported)
    }

    async fn create_user(&self, _username: &str, _password: &str) -> Result<(), ModuleError> {
        Err(ModuleError::Unsupported)
    }

    async fn delete_user(&self, _username: &str) -> Result<(), ModuleError> {
        Err(ModuleError::Unsupported)
    }
}

/// Key addressed storage for message bodies
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), ModuleError>;

    async fn read(&self, key: &str) -> Result<Vec<u8>, ModuleError>;

    /// Deleting a key that does not exist is not an error.
    async fn delete(&self, keys: &[&str]) -> Result<(), ModuleError>;
}

/// A chain client able to broadcast transactions and verify signatures
#[async_trait]
pub trait BlockChain: Send + Sync {
    fn chain_type(&self) -> &str;

    /// Broadcast a raw, already signed transaction, returning its hash.
    async fn send_raw_tx(&self, raw_tx: &str) -> Result<String, ModuleError>;

    async fn check_sign(
        &self,
        public_key: &str,
        signature: &str,
        message: &str,
    ) -> Result<bool, ModuleError>;
}

/// A module owning listening resources
pub trait Endpoint: Send + Sync {
    /// The addresses this endpoint was configured with.
    fn addresses(&self) -> &[String];
}

/// A module holding resources that must be released at shutdown
#[async_trait]
pub trait Closer: Send + Sync {
    async fn close(&self) -> Result<(), ModuleError>;
}

/// Lookup of a capability interface on a module
pub trait Capability {
    /// Used in configuration errors ("X is not a delivery target").
    const NAME: &'static str;

    fn query(module: Arc<dyn Module>) -> Option<Arc<Self>>;
}

macro_rules! capability {
    ($trait:ident, $method:ident, $name:literal) => {
        impl Capability for dyn $trait {
            const NAME: &'static str = $name;

            fn query(module: Arc<dyn Module>) -> Option<Arc<Self>> {
                module.$method()
            }
        }
    };
}

capability!(Target, as_target, "delivery target");
capability!(Checker, as_checker, "check");
capability!(Modifier, as_modifier, "modifier");
capability!(Storage, as_storage, "storage");
capability!(Authenticator, as_authenticator, "authentication provider");
capability!(BlobStore, as_blob_store, "blob store");
capability!(BlockChain, as_blockchain, "blockchain source");
capability!(Endpoint, as_endpoint, "endpoint");
capability!(Closer, as_closer, "closeable module");

impl Capability for dyn Module {
    const NAME: &'static str = "module";

    fn query(module: Arc<dyn Module>) -> Option<Arc<Self>> {
        Some(module)
    }
}

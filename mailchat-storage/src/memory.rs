//! `storage.memory`: accounts and mailboxes held in memory.
//!
//! Doubles as the local delivery target: a message delivered to it is
//! appended to the mailbox of each recipient's account. Message bodies are
//! kept inline unless a `blob_store` is configured.

use std::{
    sync::{Arc, OnceLock},
    time::SystemTime,
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use mailchat_common::{
    Address, Envelope, MessageId, Reply,
    tracing::{debug, info, warn},
};
use mailchat_module::{
    Account, BlobStore, ConfigError, ConfigMap, DeliveryResult, Instance, Module, ModuleError,
    Storage, Target,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Body {
    Inline(Arc<[u8]>),
    /// Key of the body in the blob store.
    Blob(String),
}

/// A message delivered to a mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: ulid::Ulid,
    pub message_id: MessageId,
    pub sender: Address,
    pub received_at: SystemTime,
    pub size: usize,
    body: Body,
}

#[derive(Debug)]
struct Mailbox {
    created_at: SystemTime,
    messages: Vec<StoredMessage>,
}

impl Mailbox {
    const fn new(created_at: SystemTime) -> Self {
        Self {
            created_at,
            messages: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Settings {
    auto_create: bool,
    blob_store: Option<Arc<dyn BlobStore>>,
}

pub struct MemoryStorage {
    instance: Instance,
    accounts: DashMap<String, Mailbox>,
    settings: OnceLock<Settings>,
}

/// Accounts are keyed by their lowercased name.
fn account_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl MemoryStorage {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            accounts: DashMap::new(),
            settings: OnceLock::new(),
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self::new(instance)))
    }

    fn settings(&self) -> &Settings {
        self.settings.get_or_init(Settings::default)
    }

    /// Messages in the mailbox of `account`, oldest first
    pub fn messages(&self, account: &str) -> Result<Vec<StoredMessage>, ModuleError> {
        self.accounts
            .get(&account_key(account))
            .map(|mailbox| mailbox.messages.clone())
            .ok_or_else(|| ModuleError::NotFound(account.to_string()))
    }

    /// The raw body of a stored message
    pub async fn read_body(&self, message: &StoredMessage) -> Result<Arc<[u8]>, ModuleError> {
        match &message.body {
            Body::Inline(body) => Ok(Arc::clone(body)),
            Body::Blob(key) => {
                let blob_store = self.settings().blob_store.as_ref().ok_or_else(|| {
                    ModuleError::Permanent(format!("{key}: no blob store configured"))
                })?;
                Ok(Arc::from(blob_store.read(key).await?))
            }
        }
    }

    async fn store_body(&self, envelope: &Envelope) -> Result<Body, ModuleError> {
        match &self.settings().blob_store {
            Some(blob_store) => {
                let key = ulid::Ulid::new().to_string();
                blob_store.write(&key, &envelope.body).await?;
                Ok(Body::Blob(key))
            }
            None => Ok(Body::Inline(Arc::clone(&envelope.body))),
        }
    }

    async fn discard_body(&self, body: &Body) {
        if let (Body::Blob(key), Some(blob_store)) = (body, &self.settings().blob_store)
            && let Err(err) = blob_store.delete(&[key.as_str()]).await
        {
            warn!(storage = %self.instance, key = %key, error = %err, "Failed to delete message body");
        }
    }

    async fn deliver_one(&self, envelope: &Envelope, recipient: &Address) -> DeliveryResult {
        let key = account_key(&recipient.to_string());

        if !self.accounts.contains_key(&key) {
            if !self.settings().auto_create {
                debug!(storage = %self.instance, recipient = %recipient, "No such account");
                return Err(ModuleError::Rejected(Reply::no_such_user()));
            }

            self.accounts
                .entry(key.clone())
                .or_insert_with(|| Mailbox::new(SystemTime::now()));
            info!(storage = %self.instance, account = %key, "Created account on delivery");
        }

        let body = self.store_body(envelope).await?;
        let message = StoredMessage {
            id: ulid::Ulid::new(),
            message_id: envelope.id,
            sender: envelope.sender.clone(),
            received_at: envelope.received_at,
            size: envelope.body.len(),
            body,
        };

        // The account may have been deleted while the body was written.
        let Some(mut mailbox) = self.accounts.get_mut(&key) else {
            self.discard_body(&message.body).await;
            return Err(ModuleError::Rejected(Reply::no_such_user()));
        };
        mailbox.messages.push(message);
        drop(mailbox);

        info!(
            storage = %self.instance,
            message_id = %envelope.id,
            account = %key,
            "Delivered to mailbox"
        );
        Ok(())
    }
}

#[async_trait]
impl Module for MemoryStorage {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let accounts = cfg.strings("accounts");
        let auto_create = cfg.bool("auto_create", false)?;
        let blob_store = cfg.module::<dyn BlobStore>("blob_store").await?;

        let now = SystemTime::now();
        for account in accounts {
            self.accounts
                .entry(account_key(&account))
                .or_insert_with(|| Mailbox::new(now));
        }

        let _ = self.settings.set(Settings {
            auto_create,
            blob_store,
        });
        Ok(())
    }

    fn as_storage(self: Arc<Self>) -> Option<Arc<dyn Storage>> {
        Some(self)
    }

    fn as_target(self: Arc<Self>) -> Option<Arc<dyn Target>> {
        Some(self)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_account(&self, name: &str) -> Result<Account, ModuleError> {
        let key = account_key(name);
        self.accounts
            .get(&key)
            .map(|mailbox| Account {
                name: key.clone(),
                created_at: mailbox.created_at,
            })
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))
    }

    async fn create_account(&self, name: &str) -> Result<(), ModuleError> {
        let key = account_key(name);
        if key.is_empty() {
            return Err(ModuleError::Permanent("account name is empty".to_string()));
        }

        match self.accounts.entry(key) {
            Entry::Occupied(entry) => Err(ModuleError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                info!(storage = %self.instance, account = %entry.key(), "Created account");
                entry.insert(Mailbox::new(SystemTime::now()));
                Ok(())
            }
        }
    }

    async fn delete_account(&self, name: &str) -> Result<(), ModuleError> {
        let (key, mailbox) = self
            .accounts
            .remove(&account_key(name))
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        let blobs: Vec<&str> = mailbox
            .messages
            .iter()
            .filter_map(|message| match &message.body {
                Body::Blob(key) => Some(key.as_str()),
                Body::Inline(_) => None,
            })
            .collect();

        if !blobs.is_empty()
            && let Some(blob_store) = &self.settings().blob_store
        {
            blob_store.delete(&blobs).await?;
        }

        info!(storage = %self.instance, account = %key, "Deleted account");
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<String>, ModuleError> {
        let mut accounts: Vec<String> = self
            .accounts
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        accounts.sort_unstable();
        Ok(accounts)
    }
}

#[async_trait]
impl Target for MemoryStorage {
    async fn deliver(&self, envelope: &Envelope, recipients: &[Address]) -> Vec<DeliveryResult> {
        let mut results = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            results.push(self.deliver_one(envelope, recipient).await);
        }
        results
    }
}

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mailchat_common::{
    Address,
    tracing::{debug, warn},
};
use mailchat_module::{
    Authenticator, BlockChain, ConfigError, ConfigMap, Instance, Module, ModuleError, Storage,
};

struct Sources {
    chain: Arc<dyn BlockChain>,
    storage: Option<Arc<dyn Storage>>,
}

/// `auth.pass_blockchain`: password authentication by wallet signature
///
/// The username is `<public key>@<domain>` and the password a signature of
/// the lowercased public key, checked by the configured chain. Accounts are
/// managed through the optional `storage` module.
pub struct PassBlockchain {
    instance: Instance,
    sources: OnceLock<Sources>,
}

impl PassBlockchain {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            sources: OnceLock::new(),
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self::new(instance)))
    }

    fn sources(&self) -> Result<&Sources, ModuleError> {
        self.sources
            .get()
            .ok_or_else(|| ModuleError::Temporary(format!("{} not initialized", self.instance)))
    }

    fn storage(&self) -> Result<&Arc<dyn Storage>, ModuleError> {
        self.sources()?
            .storage
            .as_ref()
            .ok_or(ModuleError::Unsupported)
    }
}

/// The public key part of `<public key>@<domain>`.
fn public_key(username: &str) -> Option<String> {
    let address = Address::parse(username).ok()?;
    let key = address.local_part();
    (!key.is_empty()).then(|| key.to_string())
}

#[async_trait]
impl Module for PassBlockchain {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let chain = cfg.module::<dyn BlockChain>("blockchain").await?;
        let chain = cfg.required("blockchain", chain)?;
        let storage = cfg.module::<dyn Storage>("storage").await?;

        let _ = self.sources.set(Sources { chain, storage });
        Ok(())
    }

    fn as_authenticator(self: Arc<Self>) -> Option<Arc<dyn Authenticator>> {
        Some(self)
    }
}

#[async_trait]
impl Authenticator for PassBlockchain {
    #[tracing::instrument(level = "debug", skip_all, fields(username = %username))]
    async fn authenticate(&self, username: &str, password: &str) -> Result<(), ModuleError> {
        let Some(key) = public_key(username) else {
            debug!(auth = %self.instance, "Username is not <public key>@<domain>");
            return Err(ModuleError::UnknownCredentials);
        };

        let chain = &self.sources()?.chain;
        let valid = chain
            .check_sign(&key, password, &key.to_lowercase())
            .await
            .inspect_err(|err| {
                warn!(auth = %self.instance, error = %err, "Failed to check signature");
            })?;

        if valid {
            Ok(())
        } else {
            Err(ModuleError::UnknownCredentials)
        }
    }

    async fn list_users(&self) -> Result<Vec<String>, ModuleError> {
        self.storage()?.list_accounts().await
    }

    async fn create_user(&self, username: &str, _password: &str) -> Result<(), ModuleError> {
        self.storage()?.create_account(username).await
    }

    async fn delete_user(&self, username: &str) -> Result<(), ModuleError> {
        self.storage()?.delete_account(username).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key() {
        assert_eq!(public_key("0xAbC@mail.example"), Some("0xAbC".to_string()));
        assert_eq!(public_key("0xabc"), Some("0xabc".to_string()));
        assert_eq!(public_key("@mail.example"), None);
        assert_eq!(public_key(""), None);
    }
}

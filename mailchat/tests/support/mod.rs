#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use async_trait::async_trait;
use mailchat_module::{
    BlockChain, ConfigError, ConfigMap, Graph, Instance, Module, ModuleError, Registry,
    testing::{self, Harness},
};

/// Chain accepting exactly the signature `signed:<message>`
pub struct MockChain {
    instance: Instance,
}

#[async_trait]
impl Module for MockChain {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, _cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        Ok(())
    }

    fn as_blockchain(self: Arc<Self>) -> Option<Arc<dyn BlockChain>> {
        Some(self)
    }
}

#[async_trait]
impl BlockChain for MockChain {
    fn chain_type(&self) -> &str {
        "test"
    }

    async fn send_raw_tx(&self, _raw_tx: &str) -> Result<String, ModuleError> {
        Err(ModuleError::Unsupported)
    }

    async fn check_sign(
        &self,
        _public_key: &str,
        signature: &str,
        message: &str,
    ) -> Result<bool, ModuleError> {
        if signature == "unreachable" {
            return Err(ModuleError::Temporary("chain unreachable".to_string()));
        }
        Ok(signature == format!("signed:{message}"))
    }
}

/// The built-in registry plus the harness modules and `test.chain`.
pub fn registry(harness: &Harness) -> Registry {
    let mut registry = harness.registry();
    mailchat::registry::install(&mut registry);
    registry.register("test.chain", |instance| {
        Ok(Arc::new(MockChain { instance }) as Arc<dyn Module>)
    });
    registry
}

pub async fn build(harness: &Harness, source: &str) -> anyhow::Result<Graph> {
    testing::build(registry(harness), source).await
}

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mailchat_common::{Address, Envelope};
use mailchat_module::{
    BlockChain, ConfigError, ConfigMap, Graph, Instance, Module, ModuleError, Registry, Target,
    testing::{self, Harness},
};
use parking_lot::Mutex;

/// Chain client recording broadcast transactions
pub struct MockChain {
    instance: Instance,
    chain_type: OnceLock<String>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Module for MockChain {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let chain_type = cfg.string_or("type", "eth")?;
        let _ = self.chain_type.set(chain_type);
        Ok(())
    }

    fn as_blockchain(self: Arc<Self>) -> Option<Arc<dyn BlockChain>> {
        Some(self)
    }
}

#[async_trait]
impl BlockChain for MockChain {
    fn chain_type(&self) -> &str {
        self.chain_type.get().map_or("", String::as_str)
    }

    async fn send_raw_tx(&self, raw_tx: &str) -> Result<String, ModuleError> {
        self.sent.lock().push(raw_tx.to_string());
        Ok(format!("hash-of-{raw_tx}"))
    }

    async fn check_sign(&self, _: &str, _: &str, _: &str) -> Result<bool, ModuleError> {
        Ok(false)
    }
}

#[derive(Default)]
pub struct Fixture {
    pub harness: Harness,
    pub sent: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> Registry {
        let mut registry = self.harness.registry();
        mailchat_pipeline::register(&mut registry);

        let sent = Arc::clone(&self.sent);
        registry.register("test.chain", move |instance| {
            Ok(Arc::new(MockChain {
                instance,
                chain_type: OnceLock::new(),
                sent: Arc::clone(&sent),
            }) as Arc<dyn Module>)
        });

        registry
    }

    pub async fn build(&self, source: &str) -> anyhow::Result<Graph> {
        testing::build(self.registry(), source).await
    }
}

pub fn target(graph: &Graph, name: &str) -> Arc<dyn Target> {
    Arc::clone(graph.get(name).expect("no such module"))
        .as_target()
        .expect("not a target")
}

pub fn addrs(addresses: &[&str]) -> Vec<Address> {
    addresses
        .iter()
        .map(|address| Address::parse(address).unwrap())
        .collect()
}

pub fn envelope(sender: &str, recipients: &[&str]) -> Envelope {
    Envelope::new(
        Address::parse(sender).unwrap(),
        addrs(recipients),
        b"Subject: test\r\n\r\nHello\r\n".as_slice(),
    )
}

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mailchat_common::Envelope;
use mailchat_module::{
    BlockChain, ConfigError, ConfigMap, Instance, Modifier, Module, ModuleError,
};

pub const CHAIN_TYPE_HEADER: &str = "X-Blockchain-Type";
pub const RAW_TX_HEADER: &str = "X-Blockchain-Tx";

/// `modify.blockchain_tx`: broadcasts the raw transaction a message carries
/// in its `X-Blockchain-Tx` header, when the message's `X-Blockchain-Type`
/// names the configured chain.
///
/// The chain is the first inline argument (`blockchain_tx &chain`) or the
/// `chain` directive.
pub struct BlockchainTx {
    instance: Instance,
    chain: OnceLock<Arc<dyn BlockChain>>,
}

impl BlockchainTx {
    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self {
            instance,
            chain: OnceLock::new(),
        }))
    }
}

#[async_trait]
impl Module for BlockchainTx {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let chain = match self.instance.args.first() {
            Some(reference) => cfg.resolve_reference::<dyn BlockChain>(reference).await?,
            None => {
                let chain = cfg.module::<dyn BlockChain>("chain").await?;
                cfg.required("chain", chain)?
            }
        };

        let _ = self.chain.set(chain);
        Ok(())
    }

    fn as_modifier(self: Arc<Self>) -> Option<Arc<dyn Modifier>> {
        Some(self)
    }
}

#[async_trait]
impl Modifier for BlockchainTx {
    async fn rewrite_body(&self, envelope: &mut Envelope) -> Result<(), ModuleError> {
        let Some(chain) = self.chain.get() else {
            return Ok(());
        };

        let chain_type = envelope.header(CHAIN_TYPE_HEADER);
        if chain_type.as_deref().map(str::trim) != Some(chain.chain_type()) {
            return Ok(());
        }

        let Some(raw_tx) = envelope
            .header(RAW_TX_HEADER)
            .filter(|tx| !tx.trim().is_empty())
        else {
            return Ok(());
        };

        let hash = chain.send_raw_tx(raw_tx.trim()).await?;
        tracing::info!(
            message_id = %envelope.id,
            chain = chain.chain_type(),
            tx = %hash,
            "Broadcast transaction"
        );

        Ok(())
    }
}

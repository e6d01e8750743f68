use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mailchat_common::{Address, Envelope};
use mailchat_module::{
    ConfigError, ConfigMap, DeliveryResult, Instance, Module, ModuleError, Target,
};

use crate::{config::parse_pipeline, rules::Pipeline};

/// `msgpipeline`: routes messages through its rules. Being a target itself,
/// it can be the destination of another pipeline or of a queue.
pub struct MsgPipeline {
    instance: Instance,
    pipeline: OnceLock<Arc<Pipeline>>,
}

impl MsgPipeline {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            pipeline: OnceLock::new(),
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self::new(instance)))
    }

    /// The rules, once initialized
    pub fn pipeline(&self) -> Option<&Arc<Pipeline>> {
        self.pipeline.get()
    }
}

#[async_trait]
impl Module for MsgPipeline {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let nodes = cfg.remaining();
        let cfg = &*cfg;
        let pipeline = parse_pipeline(cfg, cfg.location(), nodes).await?;

        let _ = self.pipeline.set(Arc::new(pipeline));
        Ok(())
    }

    fn as_target(self: Arc<Self>) -> Option<Arc<dyn Target>> {
        Some(self)
    }
}

#[async_trait]
impl Target for MsgPipeline {
    async fn deliver(&self, envelope: &Envelope, recipients: &[Address]) -> Vec<DeliveryResult> {
        match self.pipeline.get() {
            Some(pipeline) => pipeline.deliver(envelope, recipients).await,
            None => recipients
                .iter()
                .map(|_| {
                    Err(ModuleError::Temporary(format!(
                        "{} is not initialized",
                        self.instance
                    )))
                })
                .collect(),
        }
    }
}

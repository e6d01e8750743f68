use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mailchat_common::{EnhancedCode, Envelope, Reply, Status};
use mailchat_module::{
    Checker, ConfigError, ConfigMap, Instance, Module, ModuleError, Verdict,
};

use crate::matcher::{Pattern, matches_any};

/// `check.deny_recipients`: refuses messages addressed to any of the
/// configured `recipients` patterns.
pub struct DenyRecipients {
    instance: Instance,
    denied: OnceLock<Vec<Pattern>>,
}

impl DenyRecipients {
    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self {
            instance,
            denied: OnceLock::new(),
        }))
    }
}

#[async_trait]
impl Module for DenyRecipients {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let denied = super::patterns(cfg, &self.instance, "recipients")?;
        if denied.is_empty() {
            return Err(ConfigError::MissingDirective {
                location: cfg.location(),
                name: "recipients".to_string(),
            });
        }

        let _ = self.denied.set(denied);
        Ok(())
    }

    fn as_checker(self: Arc<Self>) -> Option<Arc<dyn Checker>> {
        Some(self)
    }
}

#[async_trait]
impl Checker for DenyRecipients {
    async fn check(&self, envelope: &Envelope) -> Result<Verdict, ModuleError> {
        let denied = self.denied.get().map_or(&[][..], Vec::as_slice);

        Ok(envelope
            .recipients
            .iter()
            .find(|recipient| matches_any(denied, recipient))
            .map_or(Verdict::Accept, |recipient| {
                Verdict::Reject(Reply::new(
                    Status::Error,
                    EnhancedCode(5, 7, 1),
                    format!("Recipient address rejected: {recipient}"),
                ))
            }))
    }
}

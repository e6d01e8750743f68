use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mailchat_common::{EnhancedCode, Envelope, Reply, Status};
use mailchat_module::{
    Checker, ConfigError, ConfigMap, Instance, Module, ModuleError, Verdict,
};

use crate::matcher::{Pattern, matches_any};

/// `check.require_valid_sender`: refuses messages without a usable sender,
/// optionally restricted to a set of `domains`.
pub struct RequireValidSender {
    instance: Instance,
    domains: OnceLock<Vec<Pattern>>,
}

impl RequireValidSender {
    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self {
            instance,
            domains: OnceLock::new(),
        }))
    }
}

fn reject(enhanced: EnhancedCode, message: &'static str) -> Verdict {
    Verdict::Reject(Reply::new(
        Status::MailboxNameNotAllowed,
        enhanced,
        message,
    ))
}

#[async_trait]
impl Module for RequireValidSender {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let domains = super::patterns(cfg, &self.instance, "domains")?;
        let _ = self.domains.set(domains);
        Ok(())
    }

    fn as_checker(self: Arc<Self>) -> Option<Arc<dyn Checker>> {
        Some(self)
    }
}

#[async_trait]
impl Checker for RequireValidSender {
    async fn check(&self, envelope: &Envelope) -> Result<Verdict, ModuleError> {
        let sender = &envelope.sender;

        if sender.is_null() {
            return Ok(reject(EnhancedCode(5, 1, 7), "Sender address is required"));
        }

        if sender.local_part().is_empty() || sender.domain().is_none() {
            return Ok(reject(EnhancedCode(5, 1, 7), "Sender address is malformed"));
        }

        let domains = self.domains.get().map_or(&[][..], Vec::as_slice);
        if !domains.is_empty() && !matches_any(domains, sender) {
            return Ok(reject(EnhancedCode(5, 7, 1), "Sender domain is not allowed"));
        }

        Ok(Verdict::Accept)
    }
}

//! Address rewrite tables.
//!
//! Each `replace <from> <to...>` line maps a pattern to one or more
//! replacements. A replacement is either a full address, or `@domain` to keep
//! the local part and swap the domain. The first matching line wins;
//! addresses no line matches are left alone.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mailchat_common::{Address, Domain, Node};
use mailchat_module::{ConfigError, ConfigMap, Instance, Modifier, Module, ModuleError};

use crate::matcher::Pattern;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Replacement {
    Address(Address),
    Domain(Domain),
}

impl Replacement {
    fn parse(value: &str) -> Option<Self> {
        if let Some(domain) = value.strip_prefix('@') {
            return (!domain.is_empty() && !domain.contains('@'))
                .then(|| Self::Domain(Domain::new(domain)));
        }

        Address::parse(value)
            .ok()
            .filter(|address| !address.is_null())
            .map(Self::Address)
    }

    fn apply(&self, address: &Address) -> Result<Address, ModuleError> {
        match self {
            Self::Address(replacement) => Ok(replacement.clone()),
            Self::Domain(domain) => Address::parse(&format!("{}@{domain}", address.local_part()))
                .map_err(|e| ModuleError::Permanent(format!("cannot rewrite {address}: {e}"))),
        }
    }
}

#[derive(Debug, Default)]
struct Table(Vec<(Pattern, Vec<Replacement>)>);

impl Table {
    fn parse(lines: &[Vec<String>], node: &Node, single: bool) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::invalid(node.location(), message);

        lines
            .iter()
            .map(|line| {
                let [from, to @ ..] = line.as_slice() else {
                    return Err(invalid("replace: expected a pattern".to_string()));
                };
                if to.is_empty() || (single && to.len() > 1) {
                    return Err(invalid(format!(
                        "replace {from}: expected {} replacement",
                        if single { "exactly one" } else { "at least one" }
                    )));
                }

                let pattern = from
                    .parse::<Pattern>()
                    .map_err(|e| invalid(format!("replace {from}: {e}")))?;
                let replacements: Vec<Replacement> = to
                    .iter()
                    .map(|value| {
                        Replacement::parse(value)
                            .ok_or_else(|| invalid(format!("replace {from}: invalid replacement {value}")))
                    })
                    .collect::<Result<_, _>>()?;

                Ok((pattern, replacements))
            })
            .collect::<Result<_, _>>()
            .map(Self)
    }

    fn rewrite(&self, address: &Address) -> Result<Option<Vec<Address>>, ModuleError> {
        let Some((_, replacements)) = self.0.iter().find(|(pattern, _)| pattern.matches(address))
        else {
            return Ok(None);
        };

        replacements
            .iter()
            .map(|replacement| replacement.apply(address))
            .collect::<Result<_, _>>()
            .map(Some)
    }
}

/// Inline arguments form one line; every `replace` directive adds another.
fn lines(cfg: &mut ConfigMap<'_>, instance: &Instance) -> Vec<Vec<String>> {
    let mut lines = Vec::new();
    if !instance.args.is_empty() {
        lines.push(instance.args.clone());
    }
    lines.extend(cfg.nodes("replace").into_iter().map(|node| node.args.clone()));
    lines
}

/// `modify.replace_sender`
pub struct ReplaceSender {
    instance: Instance,
    table: OnceLock<Table>,
}

impl ReplaceSender {
    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self {
            instance,
            table: OnceLock::new(),
        }))
    }
}

#[async_trait]
impl Module for ReplaceSender {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let lines = lines(cfg, &self.instance);
        let table = Table::parse(&lines, cfg.node(), true)?;
        let _ = self.table.set(table);
        Ok(())
    }

    fn as_modifier(self: Arc<Self>) -> Option<Arc<dyn Modifier>> {
        Some(self)
    }
}

#[async_trait]
impl Modifier for ReplaceSender {
    async fn rewrite_sender(&self, sender: &Address) -> Result<Address, ModuleError> {
        let Some(table) = self.table.get() else {
            return Ok(sender.clone());
        };

        Ok(table
            .rewrite(sender)?
            .and_then(|mut rewritten| rewritten.pop())
            .unwrap_or_else(|| sender.clone()))
    }
}

/// `modify.replace_rcpt`
pub struct ReplaceRcpt {
    instance: Instance,
    table: OnceLock<Table>,
}

impl ReplaceRcpt {
    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self {
            instance,
            table: OnceLock::new(),
        }))
    }
}

#[async_trait]
impl Module for ReplaceRcpt {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let lines = lines(cfg, &self.instance);
        let table = Table::parse(&lines, cfg.node(), false)?;
        let _ = self.table.set(table);
        Ok(())
    }

    fn as_modifier(self: Arc<Self>) -> Option<Arc<dyn Modifier>> {
        Some(self)
    }
}

#[async_trait]
impl Modifier for ReplaceRcpt {
    async fn rewrite_recipient(&self, recipient: &Address) -> Result<Vec<Address>, ModuleError> {
        let Some(table) = self.table.get() else {
            return Ok(vec![recipient.clone()]);
        };

        Ok(table
            .rewrite(recipient)?
            .unwrap_or_else(|| vec![recipient.clone()]))
    }
}

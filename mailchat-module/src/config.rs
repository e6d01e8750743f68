//! Typed access to a module's configuration block.

use std::{str::FromStr, sync::Arc, time::Duration};

use mailchat_common::{Hooks, Location, Node};

use crate::{
    ConfigError, Globals, Module,
    capability::Capability,
    graph::BuildContext,
};

/// Options of one configuration block.
///
/// Every child directive a module reads is marked as consumed; directives
/// left unread when `init` returns are reported as unknown.
pub struct ConfigMap<'a> {
    node: &'a Node,
    ctx: &'a BuildContext,
    consumed: Vec<bool>,
}

impl<'a> ConfigMap<'a> {
    pub(crate) fn new(node: &'a Node, ctx: &'a BuildContext) -> Self {
        Self {
            node,
            ctx,
            consumed: vec![false; node.children.len()],
        }
    }

    /// The block being configured
    pub const fn node(&self) -> &'a Node {
        self.node
    }

    pub fn location(&self) -> Location {
        self.node.location()
    }

    pub fn globals(&self) -> &Globals {
        &self.ctx.globals
    }

    pub fn hooks(&self) -> &Arc<Hooks> {
        &self.ctx.hooks
    }

    /// Every directive named `key`, marking them consumed.
    pub fn nodes(&mut self, key: &str) -> Vec<&'a Node> {
        let node = self.node;
        node.children
            .iter()
            .enumerate()
            .filter(|(_, child)| child.name == key)
            .map(|(i, child)| {
                self.consumed[i] = true;
                child
            })
            .collect()
    }

    /// The directive named `key`, which may appear at most once.
    pub fn single(&mut self, key: &str) -> Result<Option<&'a Node>, ConfigError> {
        match self.nodes(key).as_slice() {
            [] => Ok(None),
            [node] => Ok(Some(*node)),
            [_, duplicate, ..] => Err(ConfigError::invalid(
                duplicate.location(),
                format!("{key} specified more than once"),
            )),
        }
    }

    /// Every directive not consumed yet, in declaration order, marking them
    /// consumed.
    pub fn remaining(&mut self) -> Vec<&'a Node> {
        let node = self.node;
        let mut remaining = Vec::new();
        for (child, consumed) in node.children.iter().zip(self.consumed.iter_mut()) {
            if !*consumed {
                *consumed = true;
                remaining.push(child);
            }
        }
        remaining
    }

    /// A single-argument string option
    pub fn string(&mut self, key: &str) -> Result<Option<String>, ConfigError> {
        self.single(key)?.map(|node| one_arg(node).cloned()).transpose()
    }

    pub fn string_or(&mut self, key: &str, default: &str) -> Result<String, ConfigError> {
        Ok(self.string(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// All arguments of every `key` directive, concatenated
    pub fn strings(&mut self, key: &str) -> Vec<String> {
        self.nodes(key)
            .into_iter()
            .flat_map(|node| node.args.iter().cloned())
            .collect()
    }

    /// A flag; `key` with no argument means `true`.
    pub fn bool(&mut self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(node) = self.single(key)? else {
            return Ok(default);
        };

        match node.args.as_slice() {
            [] => Ok(true),
            [value] => parse_bool(value).ok_or_else(|| {
                ConfigError::invalid(
                    node.location(),
                    format!("{key}: expected yes or no, got {value}"),
                )
            }),
            _ => Err(ConfigError::invalid(
                node.location(),
                format!("{key}: expected at most one argument"),
            )),
        }
    }

    pub fn parse<T>(&mut self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(node) = self.single(key)? else {
            return Ok(default);
        };

        one_arg(node)?.parse().map_err(|e: T::Err| {
            ConfigError::invalid(node.location(), format!("{key}: {e}"))
        })
    }

    pub fn duration(&mut self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let Some(node) = self.single(key)? else {
            return Ok(default);
        };

        let value = one_arg(node)?;
        parse_duration(value).ok_or_else(|| {
            ConfigError::invalid(node.location(), format!("{key}: invalid duration {value}"))
        })
    }

    /// Turn a missing option into an error
    pub fn required<T>(&self, key: &str, value: Option<T>) -> Result<T, ConfigError> {
        value.ok_or_else(|| ConfigError::MissingDirective {
            location: self.location(),
            name: key.to_string(),
        })
    }

    /// Resolve the single module referenced by the arguments of the `key`
    /// directive, if present.
    pub async fn module<C>(&mut self, key: &str) -> Result<Option<Arc<C>>, ConfigError>
    where
        C: Capability + ?Sized,
    {
        match self.single(key)? {
            Some(node) => self.resolve_args(node).await.map(Some),
            None => Ok(None),
        }
    }

    /// Resolve the module referenced by `node`'s arguments: `&name` for a
    /// named instance, or a type name (with inline arguments and `node`'s
    /// block) for an inline definition.
    pub async fn resolve_args<C>(&self, node: &Node) -> Result<Arc<C>, ConfigError>
    where
        C: Capability + ?Sized,
    {
        let Some((reference, inline_args)) = node.args.split_first() else {
            return Err(ConfigError::invalid(
                node.location(),
                format!("{}: expected a module reference", node.name),
            ));
        };

        let module = self.ctx.resolve(reference, inline_args, node, None).await?;
        cast(module, node)
    }

    /// Resolve a reference given outside of any directive, such as an inline
    /// argument, using this block for inline definitions.
    pub async fn resolve_reference<C>(&self, reference: &str) -> Result<Arc<C>, ConfigError>
    where
        C: Capability + ?Sized,
    {
        let module = self.ctx.resolve(reference, &[], self.node, None).await?;
        cast(module, self.node)
    }

    /// Resolve each `&name` argument of `node` as a separate reference;
    /// a leading type name is an inline definition taking the whole block.
    pub async fn resolve_all<C>(&self, node: &Node) -> Result<Vec<Arc<C>>, ConfigError>
    where
        C: Capability + ?Sized,
    {
        if node.args.first().is_some_and(|arg| !arg.starts_with('&')) {
            return Ok(vec![self.resolve_args(node).await?]);
        }

        let mut modules = Vec::with_capacity(node.args.len());
        for reference in &node.args {
            let module = self.ctx.resolve(reference, &[], node, None).await?;
            modules.push(cast(module, node)?);
        }

        if modules.is_empty() {
            return Err(ConfigError::invalid(
                node.location(),
                format!("{}: expected a module reference", node.name),
            ));
        }

        Ok(modules)
    }

    /// Resolve a module named by the directive itself, as used inside
    /// `check { ... }` and `modify { ... }` blocks. Inline type names are
    /// looked up with `prefix` first (`require_valid_sender` finds
    /// `check.require_valid_sender`).
    pub async fn resolve_named<C>(&self, node: &Node, prefix: &str) -> Result<Arc<C>, ConfigError>
    where
        C: Capability + ?Sized,
    {
        let module = self
            .ctx
            .resolve(&node.name, &node.args, node, Some(prefix))
            .await?;
        cast(module, node)
    }

    pub(crate) fn finish(&self) -> Result<(), ConfigError> {
        match self.consumed.iter().position(|consumed| !consumed) {
            Some(i) => {
                let child = &self.node.children[i];
                Err(ConfigError::UnknownDirective {
                    location: child.location(),
                    name: child.name.clone(),
                })
            }
            None => Ok(()),
        }
    }
}

fn cast<C>(module: Arc<dyn Module>, node: &Node) -> Result<Arc<C>, ConfigError>
where
    C: Capability + ?Sized,
{
    let name = module.instance().display_name().to_string();
    C::query(module).ok_or_else(|| ConfigError::Capability {
        location: node.location(),
        name,
        capability: C::NAME,
    })
}

fn one_arg(node: &Node) -> Result<&String, ConfigError> {
    match node.args.as_slice() {
        [value] => Ok(value),
        _ => Err(ConfigError::invalid(
            node.location(),
            format!("{}: expected exactly one argument", node.name),
        )),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "yes" | "true" | "on" => Some(true),
        "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Parse durations such as `30s`, `15m`, `1h30m` or `500ms`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut rest = value.trim();

    if rest.is_empty() {
        return None;
    }

    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60)?),
            "h" => Duration::from_secs(amount.checked_mul(3600)?),
            "d" => Duration::from_secs(amount.checked_mul(86_400)?),
            _ => return None,
        };
        rest = &rest[unit_len..];

        total = total.checked_add(unit)?;
    }

    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172_800)));
    }

    #[test]
    fn invalid_durations() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("m"), None);
        assert_eq!(parse_duration("5 weeks"), None);
    }

    #[test]
    fn bools() {
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}

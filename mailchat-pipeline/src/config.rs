//! Building a [`Pipeline`] from its configuration block.
//!
//! ```ron
//! (name: "msgpipeline", args: ["local_routing"], children: [
//!     (name: "check", children: [(name: "require_valid_sender")]),
//!     (name: "source", args: ["example.com"], children: [
//!         (name: "destination", args: ["example.com"], children: [
//!             (name: "deliver_to", args: ["&local_mailboxes"]),
//!         ]),
//!         (name: "default_destination", children: [
//!             (name: "reject", args: ["550", "5.1.1", "User", "doesn't", "exist"]),
//!         ]),
//!     ]),
//!     (name: "default_source", children: [
//!         (name: "reject"),
//!     ]),
//! ])
//! ```

use std::sync::Arc;

use futures_util::{FutureExt, future::BoxFuture};
use mailchat_common::{EnhancedCode, Location, Node, Reply, Status};
use mailchat_module::{Checker, ConfigError, ConfigMap, Modifier, Target};

use crate::{
    matcher::Pattern,
    rules::{Action, DestinationBlock, Pipeline, Rule, SourceBlock},
};

/// Parse the rules of a pipeline (or `reroute`) block.
pub fn parse_pipeline<'a>(
    cfg: &'a ConfigMap<'a>,
    location: Location,
    nodes: Vec<&'a Node>,
) -> BoxFuture<'a, Result<Pipeline, ConfigError>> {
    async move {
        let mut checks = Vec::new();
        let mut modifiers = Vec::new();
        let mut sources = Vec::new();
        let mut default_source = None;
        let mut destinations = Vec::new();
        let mut default_destination = None;

        for node in nodes {
            match node.name.as_str() {
                "check" => checks.extend(parse_checks(cfg, node).await?),
                "modify" => modifiers.extend(parse_modifiers(cfg, node).await?),
                "source" => sources.push(Rule {
                    patterns: parse_patterns(node)?,
                    block: parse_source(cfg, node).await?,
                }),
                "default_source" => {
                    let block = parse_source(cfg, node).await?;
                    set_once(&mut default_source, block, node)?;
                }
                "destination" => destinations.push(Rule {
                    patterns: parse_patterns(node)?,
                    block: parse_destination(cfg, node).await?,
                }),
                "default_destination" => {
                    let block = parse_destination(cfg, node).await?;
                    set_once(&mut default_destination, block, node)?;
                }
                _ => return Err(unknown(node)),
            }
        }

        let has_destinations = !destinations.is_empty() || default_destination.is_some();
        let has_sources = !sources.is_empty() || default_source.is_some();

        let default_source = match (has_sources, has_destinations) {
            (true, true) => {
                return Err(ConfigError::invalid(
                    location,
                    "destination rules must be inside a source block when source rules are used",
                ));
            }
            (false, true) => SourceBlock {
                checks: Vec::new(),
                modifiers: Vec::new(),
                destinations,
                default_destination: required(default_destination, &location, "default_destination")?,
            },
            _ => required(default_source, &location, "default_source")?,
        };

        Ok(Pipeline {
            checks,
            modifiers,
            sources,
            default_source,
        })
    }
    .boxed()
}

/// A source block holds destination rules, or (as a shorthand) a single
/// action applying to every recipient.
async fn parse_source(cfg: &ConfigMap<'_>, block: &Node) -> Result<SourceBlock, ConfigError> {
    let mut checks = Vec::new();
    let mut modifiers = Vec::new();
    let mut destinations = Vec::new();
    let mut default_destination = None;
    let mut actions = Vec::new();

    for node in &block.children {
        match node.name.as_str() {
            "check" => checks.extend(parse_checks(cfg, node).await?),
            "modify" => modifiers.extend(parse_modifiers(cfg, node).await?),
            "destination" => destinations.push(Rule {
                patterns: parse_patterns(node)?,
                block: parse_destination(cfg, node).await?,
            }),
            "default_destination" => {
                let block = parse_destination(cfg, node).await?;
                set_once(&mut default_destination, block, node)?;
            }
            "deliver_to" | "reject" | "reroute" => actions.push(node),
            _ => return Err(unknown(node)),
        }
    }

    if !actions.is_empty() {
        if !destinations.is_empty() || default_destination.is_some() {
            return Err(ConfigError::invalid(
                block.location(),
                "a source block takes either destination rules or an action, not both",
            ));
        }
        default_destination = Some(DestinationBlock {
            checks: Vec::new(),
            modifiers: Vec::new(),
            action: parse_action(cfg, block, &actions).await?,
        });
    }

    Ok(SourceBlock {
        checks,
        modifiers,
        destinations,
        default_destination: required(
            default_destination,
            &block.location(),
            "default_destination",
        )?,
    })
}

async fn parse_destination(
    cfg: &ConfigMap<'_>,
    block: &Node,
) -> Result<DestinationBlock, ConfigError> {
    let mut checks = Vec::new();
    let mut modifiers = Vec::new();
    let mut actions = Vec::new();

    for node in &block.children {
        match node.name.as_str() {
            "check" => checks.extend(parse_checks(cfg, node).await?),
            "modify" => modifiers.extend(parse_modifiers(cfg, node).await?),
            "deliver_to" | "reject" | "reroute" => actions.push(node),
            _ => return Err(unknown(node)),
        }
    }

    Ok(DestinationBlock {
        checks,
        modifiers,
        action: parse_action(cfg, block, &actions).await?,
    })
}

/// Exactly one kind of action; `deliver_to` may repeat.
async fn parse_action(
    cfg: &ConfigMap<'_>,
    block: &Node,
    actions: &[&Node],
) -> Result<Action, ConfigError> {
    let Some(first) = actions.first() else {
        return Err(ConfigError::MissingDirective {
            location: block.location(),
            name: "deliver_to, reroute or reject".to_string(),
        });
    };

    if let Some(other) = actions
        .iter()
        .skip(1)
        .find(|node| first.name != "deliver_to" || node.name != first.name)
    {
        return Err(ConfigError::invalid(
            other.location(),
            "only one of deliver_to, reroute or reject may be used in a block",
        ));
    }

    match first.name.as_str() {
        "deliver_to" => {
            let mut targets = Vec::new();
            for node in actions {
                targets.extend(cfg.resolve_all::<dyn Target>(node).await?);
            }
            Ok(Action::Deliver(targets))
        }
        "reject" => parse_reject(first).map(Action::Reject),
        _ => {
            let nested = parse_pipeline(cfg, first.location(), first.children.iter().collect()).await?;
            Ok(Action::Reroute(Arc::new(nested)))
        }
    }
}

/// `reject [code] [enhanced-code] [text...]`
fn parse_reject(node: &Node) -> Result<Reply, ConfigError> {
    let mut args = node.args.iter();

    let Some(code) = args.next() else {
        return Ok(Reply::policy_reject());
    };

    let status = code
        .parse::<u16>()
        .ok()
        .filter(|code| (400..600).contains(code))
        .map(Status::from)
        .ok_or_else(|| {
            ConfigError::invalid(node.location(), format!("reject: invalid status code {code}"))
        })?;
    let class = if status.is_temporary() { 4 } else { 5 };

    let enhanced = match args.next() {
        Some(enhanced) => EnhancedCode::parse(enhanced)
            .filter(|parsed| parsed.0 == class)
            .ok_or_else(|| {
                ConfigError::invalid(
                    node.location(),
                    format!("reject: invalid enhanced code {enhanced} for {code}"),
                )
            })?,
        None => EnhancedCode(class, 7, 0),
    };

    let text: Vec<&str> = args.map(String::as_str).collect();
    let reply = Reply::policy_reject();
    let message = if text.is_empty() {
        reply.message
    } else {
        text.join(" ").into()
    };

    Ok(Reply::new(status, enhanced, message))
}

async fn parse_checks(
    cfg: &ConfigMap<'_>,
    node: &Node,
) -> Result<Vec<Arc<dyn Checker>>, ConfigError> {
    let mut checks = Vec::new();
    if !node.args.is_empty() {
        checks.extend(cfg.resolve_all::<dyn Checker>(node).await?);
    }
    for child in &node.children {
        checks.push(cfg.resolve_named::<dyn Checker>(child, "check").await?);
    }
    Ok(checks)
}

async fn parse_modifiers(
    cfg: &ConfigMap<'_>,
    node: &Node,
) -> Result<Vec<Arc<dyn Modifier>>, ConfigError> {
    let mut modifiers = Vec::new();
    if !node.args.is_empty() {
        modifiers.extend(cfg.resolve_all::<dyn Modifier>(node).await?);
    }
    for child in &node.children {
        modifiers.push(cfg.resolve_named::<dyn Modifier>(child, "modify").await?);
    }
    Ok(modifiers)
}

fn parse_patterns(node: &Node) -> Result<Vec<Pattern>, ConfigError> {
    if node.args.is_empty() {
        return Err(ConfigError::invalid(
            node.location(),
            format!("{}: expected at least one pattern", node.name),
        ));
    }

    node.args
        .iter()
        .map(|arg| {
            arg.parse::<Pattern>()
                .map_err(|e| ConfigError::invalid(node.location(), format!("{}: {e}", node.name)))
        })
        .collect()
}

fn set_once<T>(slot: &mut Option<T>, value: T, node: &Node) -> Result<(), ConfigError> {
    if slot.is_some() {
        return Err(ConfigError::invalid(
            node.location(),
            format!("{} specified more than once", node.name),
        ));
    }
    *slot = Some(value);
    Ok(())
}

fn required<T>(value: Option<T>, location: &Location, name: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingDirective {
        location: location.clone(),
        name: name.to_string(),
    })
}

fn unknown(node: &Node) -> ConfigError {
    ConfigError::UnknownDirective {
        location: node.location(),
        name: node.name.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reject_defaults() {
        let reply = parse_reject(&Node::new("reject")).unwrap();
        assert_eq!(
            reply.to_string(),
            "554 5.7.0 Message rejected due to a local policy"
        );

        let reply = parse_reject(&Node::new("reject").arg("550")).unwrap();
        assert_eq!(
            reply.to_string(),
            "550 5.7.0 Message rejected due to a local policy"
        );

        let reply = parse_reject(&Node::new("reject").args(["450", "4.2.0", "Try", "later"])).unwrap();
        assert_eq!(reply.to_string(), "450 4.2.0 Try later");
    }

    #[test]
    fn reject_validates_codes() {
        assert!(parse_reject(&Node::new("reject").arg("250")).is_err());
        assert!(parse_reject(&Node::new("reject").arg("abc")).is_err());
        assert!(parse_reject(&Node::new("reject").args(["550", "4.0.0"])).is_err());
    }

    #[test]
    fn patterns_are_required() {
        let err = parse_patterns(&Node::new("destination").at_line(3)).unwrap_err();
        assert!(err.to_string().ends_with("destination: expected at least one pattern"));

        let patterns = parse_patterns(&Node::new("source").args(["a@example.com", "*.example.org"]))
            .unwrap();
        assert_eq!(patterns.len(), 2);
    }
}

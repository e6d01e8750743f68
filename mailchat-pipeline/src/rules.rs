//! The routing rule tree and message delivery through it.
//!
//! A pipeline selects one source block for the message by its sender, then
//! a destination block per recipient. Rules at each level are tried in
//! declaration order and the first match wins; every level has a default,
//! so routing never comes up empty.

use std::sync::Arc;

use futures_util::{FutureExt, future::BoxFuture};
use mailchat_common::{Address, EnhancedCode, Envelope, Reply, Status};
use mailchat_module::{Checker, DeliveryResult, Modifier, ModuleError, Target};

use crate::{
    executor::{Applied, apply_tracked},
    matcher::{Pattern, matches_any},
};

/// Nesting limit for `reroute`
pub const MAX_REROUTE_DEPTH: usize = 8;

/// A block selected by a list of patterns
pub struct Rule<T> {
    pub patterns: Vec<Pattern>,
    pub block: T,
}

/// What happens to recipients that reach a destination block
pub enum Action {
    Deliver(Vec<Arc<dyn Target>>),
    Reject(Reply),
    Reroute(Arc<Pipeline>),
}

pub struct DestinationBlock {
    pub checks: Vec<Arc<dyn Checker>>,
    pub modifiers: Vec<Arc<dyn Modifier>>,
    pub action: Action,
}

pub struct SourceBlock {
    pub checks: Vec<Arc<dyn Checker>>,
    pub modifiers: Vec<Arc<dyn Modifier>>,
    pub destinations: Vec<Rule<DestinationBlock>>,
    pub default_destination: DestinationBlock,
}

impl SourceBlock {
    /// Destination block for `recipient`, with its rule index (`None` for
    /// the default).
    pub fn select(&self, recipient: &Address) -> (Option<usize>, &DestinationBlock) {
        self.destinations
            .iter()
            .position(|rule| matches_any(&rule.patterns, recipient))
            .map_or((None, &self.default_destination), |i| {
                (Some(i), &self.destinations[i].block)
            })
    }
}

pub struct Pipeline {
    pub checks: Vec<Arc<dyn Checker>>,
    pub modifiers: Vec<Arc<dyn Modifier>>,
    pub sources: Vec<Rule<SourceBlock>>,
    pub default_source: SourceBlock,
}

/// Chains and action that apply to one recipient
pub struct ResolvedAction<'p> {
    pub checks: Vec<&'p Arc<dyn Checker>>,
    pub modifiers: Vec<&'p Arc<dyn Modifier>>,
    pub action: &'p Action,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("checks", &self.checks.len())
            .field("modifiers", &self.modifiers.len())
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Source block for `sender`
    pub fn source(&self, sender: &Address) -> &SourceBlock {
        self.sources
            .iter()
            .find(|rule| matches_any(&rule.patterns, sender))
            .map_or(&self.default_source, |rule| &rule.block)
    }

    /// The chains and action for every recipient of `envelope`, as the rules
    /// select them for the envelope as submitted.
    ///
    /// Delivery itself re-selects destinations after the source-level
    /// modifiers have run, since those may rewrite recipients.
    pub fn route<'p>(&'p self, envelope: &Envelope) -> Vec<(Address, ResolvedAction<'p>)> {
        let source = self.source(&envelope.sender);

        envelope
            .recipients
            .iter()
            .map(|recipient| {
                let (_, destination) = source.select(recipient);
                let resolved = ResolvedAction {
                    checks: self
                        .checks
                        .iter()
                        .chain(&source.checks)
                        .chain(&destination.checks)
                        .collect(),
                    modifiers: self
                        .modifiers
                        .iter()
                        .chain(&source.modifiers)
                        .chain(&destination.modifiers)
                        .collect(),
                    action: &destination.action,
                };
                (recipient.clone(), resolved)
            })
            .collect()
    }

    /// Run `envelope` through the pipeline for `recipients`, returning one
    /// result per recipient in the same order.
    #[tracing::instrument(level = "debug", skip_all, fields(message_id = %envelope.id, recipients = recipients.len()))]
    pub async fn deliver(&self, envelope: &Envelope, recipients: &[Address]) -> Vec<DeliveryResult> {
        self.deliver_at(envelope, recipients, 0).await
    }

    fn deliver_at<'a>(
        &'a self,
        envelope: &'a Envelope,
        recipients: &'a [Address],
        depth: usize,
    ) -> BoxFuture<'a, Vec<DeliveryResult>> {
        async move {
            let mut results: Vec<DeliveryResult> = recipients.iter().map(|_| Ok(())).collect();

            if depth > MAX_REROUTE_DEPTH {
                let reply = Reply::new(
                    Status::TransactionFailed,
                    EnhancedCode(5, 4, 6),
                    "Routing loop detected",
                );
                fail_all(&mut results, 0..recipients.len(), &reply);
                return results;
            }

            let source = self.source(&envelope.sender);
            let checks: Vec<Arc<dyn Checker>> =
                self.checks.iter().chain(&source.checks).cloned().collect();
            let modifiers: Vec<Arc<dyn Modifier>> = self
                .modifiers
                .iter()
                .chain(&source.modifiers)
                .cloned()
                .collect();

            let applied = match apply_tracked(
                envelope.with_recipients(recipients.to_vec()),
                (0..recipients.len()).collect(),
                &checks,
                &modifiers,
            )
            .await
            {
                Ok(applied) => applied,
                Err(reply) => {
                    fail_all(&mut results, 0..recipients.len(), &reply);
                    return results;
                }
            };

            for (destination, group) in group_by_destination(source, &applied) {
                let group_envelope = applied.envelope.with_recipients(group.recipients);
                let origins = group.origins.clone();
                let applied = match apply_tracked(
                    group_envelope,
                    group.origins,
                    &destination.checks,
                    &destination.modifiers,
                )
                .await
                {
                    Ok(applied) => applied,
                    Err(reply) => {
                        fail_all(&mut results, origins, &reply);
                        continue;
                    }
                };

                match &destination.action {
                    Action::Reject(reply) => {
                        fail_all(&mut results, applied.origins.iter().copied(), reply);
                    }
                    Action::Deliver(targets) => {
                        for target in targets {
                            let outcome = target
                                .deliver(&applied.envelope, &applied.envelope.recipients)
                                .await;
                            record(&mut results, &applied.origins, outcome);
                        }
                    }
                    Action::Reroute(pipeline) => {
                        let outcome = pipeline
                            .deliver_at(&applied.envelope, &applied.envelope.recipients, depth + 1)
                            .await;
                        record(&mut results, &applied.origins, outcome);
                    }
                }
            }

            results
        }
        .boxed()
    }
}

struct Group {
    recipients: Vec<Address>,
    origins: Vec<usize>,
}

/// Split recipients by selected destination block, in order of first
/// appearance.
fn group_by_destination<'s>(
    source: &'s SourceBlock,
    applied: &Applied,
) -> Vec<(&'s DestinationBlock, Group)> {
    let mut groups: Vec<(Option<usize>, &DestinationBlock, Group)> = Vec::new();

    for (recipient, origin) in applied.envelope.recipients.iter().zip(&applied.origins) {
        let (key, destination) = source.select(recipient);
        match groups.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, _, group)) => {
                group.recipients.push(recipient.clone());
                group.origins.push(*origin);
            }
            None => groups.push((
                key,
                destination,
                Group {
                    recipients: vec![recipient.clone()],
                    origins: vec![*origin],
                },
            )),
        }
    }

    groups
        .into_iter()
        .map(|(_, destination, group)| (destination, group))
        .collect()
}

fn fail_all(
    results: &mut [DeliveryResult],
    origins: impl IntoIterator<Item = usize>,
    reply: &Reply,
) {
    for origin in origins {
        set_failure(results, origin, ModuleError::Rejected(reply.clone()));
    }
}

/// Map a target's per-recipient outcome back to the original recipients.
fn record(results: &mut [DeliveryResult], origins: &[usize], outcome: Vec<DeliveryResult>) {
    let mut outcome = outcome.into_iter();

    for origin in origins {
        match outcome.next() {
            Some(Ok(())) => {}
            Some(Err(err)) => set_failure(results, *origin, err),
            None => set_failure(
                results,
                *origin,
                ModuleError::Temporary("target returned no result for recipient".into()),
            ),
        }
    }
}

/// The first failure recorded for a recipient is the one reported.
fn set_failure(results: &mut [DeliveryResult], origin: usize, err: ModuleError) {
    if let Some(slot) = results.get_mut(origin)
        && slot.is_ok()
    {
        *slot = Err(err);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use mailchat_module::Verdict;

    use super::*;

    struct Accept;

    #[async_trait]
    impl Checker for Accept {
        async fn check(&self, _: &Envelope) -> Result<Verdict, ModuleError> {
            Ok(Verdict::Accept)
        }
    }

    fn rule<T>(patterns: &[&str], block: T) -> Rule<T> {
        Rule {
            patterns: patterns.iter().map(|p| p.parse().unwrap()).collect(),
            block,
        }
    }

    fn reject(code: u16) -> DestinationBlock {
        DestinationBlock {
            checks: Vec::new(),
            modifiers: Vec::new(),
            action: Action::Reject(Reply::new(Status::from(code), EnhancedCode(5, 7, 0), "no")),
        }
    }

    fn code(action: &Action) -> u16 {
        match action {
            Action::Reject(reply) => reply.status.into(),
            _ => 0,
        }
    }

    #[test]
    fn route_resolves_chains_per_recipient() {
        let checked = DestinationBlock {
            checks: vec![Arc::new(Accept)],
            ..reject(551)
        };
        let pipeline = Pipeline {
            checks: vec![Arc::new(Accept)],
            modifiers: Vec::new(),
            sources: vec![rule(
                &["example.com"],
                SourceBlock {
                    checks: vec![Arc::new(Accept)],
                    modifiers: Vec::new(),
                    destinations: vec![rule(&["a@example.org"], checked), rule(&["example.org"], reject(552))],
                    default_destination: reject(553),
                },
            )],
            default_source: SourceBlock {
                checks: Vec::new(),
                modifiers: Vec::new(),
                destinations: Vec::new(),
                default_destination: reject(554),
            },
        };

        let envelope = Envelope::new(
            Address::parse("s@example.com").unwrap(),
            ["a@example.org", "b@example.org", "c@example.net"]
                .iter()
                .map(|r| Address::parse(r).unwrap())
                .collect(),
            b"".as_slice(),
        );

        let routes = pipeline.route(&envelope);
        let codes: Vec<u16> = routes.iter().map(|(_, resolved)| code(resolved.action)).collect();
        assert_eq!(codes, vec![551, 552, 553]);
        assert_eq!(routes[0].1.checks.len(), 3);
        assert_eq!(routes[1].1.checks.len(), 2);

        let foreign = Envelope::new(Address::null(), envelope.recipients.clone(), b"".as_slice());
        let routes = pipeline.route(&foreign);
        assert!(routes.iter().all(|(_, resolved)| code(resolved.action) == 554));
        assert!(routes.iter().all(|(_, resolved)| resolved.checks.len() == 1));
    }
}

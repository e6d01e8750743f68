//! Check/modify chain execution.
//!
//! Checks run first, in order; the first rejection stops the chain and
//! nothing after it runs. Modifiers then run in order, each one seeing the
//! envelope as the previous one left it: sender first, then every
//! recipient (which may fan out to several or to none), then the body.
//!
//! A check or modifier that fails to run (as opposed to refusing the
//! message) turns into a temporary local error, so the submitter may try
//! again later.

use std::sync::Arc;

use mailchat_common::{Address, Envelope, Reply};
use mailchat_module::{Checker, Modifier, ModuleError, Verdict};

/// Envelope after a chain ran, with the origin of every recipient.
///
/// `origins[i]` is the label the caller gave to the recipient that
/// `envelope.recipients[i]` was derived from.
#[derive(Debug, Clone)]
pub struct Applied {
    pub envelope: Envelope,
    pub origins: Vec<usize>,
}

/// Run `checks` then `modifiers` over `envelope`.
///
/// # Errors
///
/// Returns the reply to hand back when a check rejects the message, or when
/// a check or modifier fails.
pub async fn apply(
    envelope: Envelope,
    checks: &[Arc<dyn Checker>],
    modifiers: &[Arc<dyn Modifier>],
) -> Result<Envelope, Reply> {
    let origins = (0..envelope.recipients.len()).collect();
    apply_tracked(envelope, origins, checks, modifiers)
        .await
        .map(|applied| applied.envelope)
}

/// [`apply`], keeping track of which recipient each rewritten recipient
/// came from.
///
/// # Errors
///
/// As [`apply`].
pub async fn apply_tracked(
    mut envelope: Envelope,
    mut origins: Vec<usize>,
    checks: &[Arc<dyn Checker>],
    modifiers: &[Arc<dyn Modifier>],
) -> Result<Applied, Reply> {
    debug_assert_eq!(envelope.recipients.len(), origins.len());

    for check in checks {
        match check.check(&envelope).await {
            Ok(Verdict::Accept) => {}
            Ok(Verdict::Reject(reply)) => {
                tracing::info!(message_id = %envelope.id, %reply, "Message rejected by check");
                return Err(reply);
            }
            Err(err) => return Err(local_error("check", &envelope, &err)),
        }
    }

    for modifier in modifiers {
        envelope.sender = modifier
            .rewrite_sender(&envelope.sender)
            .await
            .map_err(|err| local_error("modifier", &envelope, &err))?;

        let mut recipients: Vec<Address> = Vec::with_capacity(envelope.recipients.len());
        let mut rewritten_origins = Vec::with_capacity(origins.len());
        for (recipient, origin) in envelope.recipients.iter().zip(&origins) {
            let replacements = modifier
                .rewrite_recipient(recipient)
                .await
                .map_err(|err| local_error("modifier", &envelope, &err))?;

            for replacement in replacements {
                let key = replacement.normalized();
                if recipients.iter().all(|seen| seen.normalized() != key) {
                    recipients.push(replacement);
                    rewritten_origins.push(*origin);
                }
            }
        }
        envelope.recipients = recipients;
        origins = rewritten_origins;

        if let Err(err) = modifier.rewrite_body(&mut envelope).await {
            return Err(local_error("modifier", &envelope, &err));
        }
    }

    Ok(Applied { envelope, origins })
}

fn local_error(stage: &str, envelope: &Envelope, err: &ModuleError) -> Reply {
    if let ModuleError::Rejected(reply) = err {
        return reply.clone();
    }

    tracing::warn!(message_id = %envelope.id, error = %err, "{stage} failed");
    Reply::local_error(format!("Internal error during {stage} processing"))
}

//! Built-in checks.

pub mod deny_recipients;
pub mod require_valid_sender;

pub use deny_recipients::DenyRecipients;
pub use require_valid_sender::RequireValidSender;

use mailchat_module::{ConfigError, ConfigMap, Instance};

use crate::matcher::Pattern;

/// Patterns given as inline arguments plus those of every `key` directive.
pub(crate) fn patterns(
    cfg: &mut ConfigMap<'_>,
    instance: &Instance,
    key: &str,
) -> Result<Vec<Pattern>, ConfigError> {
    instance
        .args
        .iter()
        .cloned()
        .chain(cfg.strings(key))
        .map(|pattern| {
            pattern
                .parse::<Pattern>()
                .map_err(|e| ConfigError::invalid(cfg.location(), format!("{key}: {e}")))
        })
        .collect()
}

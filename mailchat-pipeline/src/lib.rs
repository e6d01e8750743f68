//! Per-message routing for MailChat.
//!
//! A message enters through [`Pipeline::deliver`] (usually via the
//! `msgpipeline` module's [`Target`](mailchat_module::Target)
//! implementation). The sender selects a source block, each recipient a
//! destination block, and the check/modify chains of every level run
//! before the destination's action.

pub mod check;
pub mod config;
pub mod executor;
pub mod matcher;
pub mod modify;
pub mod module;
pub mod rules;

pub use executor::{Applied, apply, apply_tracked};
pub use matcher::{Pattern, PatternError};
pub use module::MsgPipeline;
pub use rules::{Action, DestinationBlock, Pipeline, ResolvedAction, Rule, SourceBlock};

use mailchat_module::Registry;

/// Register the pipeline and the built-in checks and modifiers.
pub fn register(registry: &mut Registry) {
    registry
        .register("msgpipeline", MsgPipeline::factory)
        .register(
            "check.require_valid_sender",
            check::RequireValidSender::factory,
        )
        .register("check.deny_recipients", check::DenyRecipients::factory)
        .register("modify.replace_sender", modify::ReplaceSender::factory)
        .register("modify.replace_rcpt", modify::ReplaceRcpt::factory)
        .register("modify.add_header", modify::AddHeader::factory)
        .register("modify.blockchain_tx", modify::BlockchainTx::factory);
}

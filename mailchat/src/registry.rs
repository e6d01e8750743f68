use mailchat_module::Registry;

use crate::auth::PassBlockchain;

/// Add every built-in module type to `registry`.
pub fn install(registry: &mut Registry) {
    mailchat_pipeline::register(registry);
    mailchat_delivery::register(registry);
    mailchat_storage::register(registry);
    mailchat_health::register(registry);
    registry.register("auth.pass_blockchain", PassBlockchain::factory);
}

/// The registry of built-in module types
pub fn builtin() -> Registry {
    let mut registry = Registry::new();
    install(&mut registry);
    registry
}

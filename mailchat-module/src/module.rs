use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    ConfigError, ConfigMap,
    capability::{
        Authenticator, BlobStore, BlockChain, Checker, Closer, Endpoint, Modifier, Storage,
        Target,
    },
};

/// Identity handed to a factory when a configuration block is instantiated
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Instance {
    pub type_name: String,
    /// Canonical name; empty for inline definitions.
    pub name: String,
    pub aliases: Vec<String>,
    /// Inline arguments, or the raw arguments for endpoints.
    pub args: Vec<String>,
}

impl Instance {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Name to use in logs and errors
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.type_name
        } else {
            &self.name
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() || self.name == self.type_name {
            f.write_str(&self.type_name)
        } else {
            write!(f, "{} ({})", self.name, self.type_name)
        }
    }
}

/// A configured component of the graph.
///
/// Factories build modules in an unconfigured state; [`Module::init`] is
/// called exactly once, when the first consumer resolves a reference to the
/// module (or during the endpoint pass, for endpoints). Capabilities are
/// exposed through the `as_*` methods, which return `None` unless the module
/// overrides them.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    fn instance(&self) -> &Instance;

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError>;

    fn as_target(self: Arc<Self>) -> Option<Arc<dyn Target>> {
        None
    }

    fn as_checker(self: Arc<Self>) -> Option<Arc<dyn Checker>> {
        None
    }

    fn as_modifier(self: Arc<Self>) -> Option<Arc<dyn Modifier>> {
        None
    }

    fn as_storage(self: Arc<Self>) -> Option<Arc<dyn Storage>> {
        None
    }

    fn as_authenticator(self: Arc<Self>) -> Option<Arc<dyn Authenticator>> {
        None
    }

    fn as_blob_store(self: Arc<Self>) -> Option<Arc<dyn BlobStore>> {
        None
    }

    fn as_blockchain(self: Arc<Self>) -> Option<Arc<dyn BlockChain>> {
        None
    }

    fn as_endpoint(self: Arc<Self>) -> Option<Arc<dyn Endpoint>> {
        None
    }

    fn as_closer(self: Arc<Self>) -> Option<Arc<dyn Closer>> {
        None
    }
}

impl fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Module").field(self.instance()).finish()
    }
}

/// The set of capabilities a module exposes, for inspection and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub target: bool,
    pub checker: bool,
    pub modifier: bool,
    pub storage: bool,
    pub authenticator: bool,
    pub blob_store: bool,
    pub blockchain: bool,
    pub endpoint: bool,
    pub closer: bool,
}

impl Capabilities {
    pub fn of(module: &Arc<dyn Module>) -> Self {
        Self {
            target: Arc::clone(module).as_target().is_some(),
            checker: Arc::clone(module).as_checker().is_some(),
            modifier: Arc::clone(module).as_modifier().is_some(),
            storage: Arc::clone(module).as_storage().is_some(),
            authenticator: Arc::clone(module).as_authenticator().is_some(),
            blob_store: Arc::clone(module).as_blob_store().is_some(),
            blockchain: Arc::clone(module).as_blockchain().is_some(),
            endpoint: Arc::clone(module).as_endpoint().is_some(),
            closer: Arc::clone(module).as_closer().is_some(),
        }
    }
}

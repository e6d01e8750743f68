//! Building the live module graph from configuration blocks.
//!
//! The build walks the top-level blocks once, instantiating every endpoint
//! and module and recording names and aliases. Endpoints are then
//! initialized in declaration order; a module is initialized the first time
//! something resolves a reference to it, so blocks may refer to modules
//! declared later in the file. A module nothing refers to is an error.

use std::sync::Arc;

use ahash::AHashMap;
use futures_util::{FutureExt, future::BoxFuture};
use mailchat_common::{Hooks, Node, internal};
use parking_lot::Mutex;

use crate::{ConfigError, ConfigMap, Globals, Instance, Module, Registry};

/// Names and aliases known to one build.
#[derive(Debug, Default, Clone)]
pub struct Instances {
    canonical: AHashMap<String, String>,
}

impl Instances {
    pub fn has_instance(&self, name: &str) -> bool {
        self.canonical.contains_key(name)
    }

    /// Record a primary instance name. Returns `false` if the name is
    /// already taken by an instance or an alias.
    pub fn mark_instance(&mut self, name: &str) -> bool {
        self.register_alias(name, name)
    }

    /// Record `alias` as another name for `canonical`. Returns `false` if
    /// the alias is already taken.
    pub fn register_alias(&mut self, alias: &str, canonical: &str) -> bool {
        if self.canonical.contains_key(alias) {
            return false;
        }
        self.canonical
            .insert(alias.to_string(), canonical.to_string());
        true
    }

    pub fn canonical(&self, name: &str) -> Option<&str> {
        self.canonical.get(name).map(String::as_str)
    }

    /// Canonical instance names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .canonical
            .iter()
            .filter(|(name, canonical)| name == canonical)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Initializing,
    Ready,
    Failed,
}

struct Slot {
    module: Arc<dyn Module>,
    node: Node,
    state: Mutex<SlotState>,
}

pub(crate) struct BuildContext {
    pub(crate) registry: Arc<Registry>,
    pub(crate) globals: Arc<Globals>,
    pub(crate) hooks: Arc<Hooks>,
    slots: AHashMap<String, Arc<Slot>>,
    initialized: Mutex<Vec<Arc<dyn Module>>>,
}

impl BuildContext {
    /// Resolve `reference`: `&name` for a declared instance, otherwise a
    /// module type to define inline with `node` as its block.
    pub(crate) fn resolve<'s>(
        &'s self,
        reference: &'s str,
        inline_args: &'s [String],
        node: &'s Node,
        prefix: Option<&'s str>,
    ) -> BoxFuture<'s, Result<Arc<dyn Module>, ConfigError>> {
        async move {
            match reference.strip_prefix('&') {
                Some(name) => self.ensure_init(name, node).await,
                None => self.inline(reference, inline_args, node, prefix).await,
            }
        }
        .boxed()
    }

    async fn ensure_init(&self, name: &str, from: &Node) -> Result<Arc<dyn Module>, ConfigError> {
        let slot = self
            .slots
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownReference {
                location: from.location(),
                name: name.to_string(),
            })?;

        {
            let mut state = slot.state.lock();
            match *state {
                SlotState::Ready => return Ok(Arc::clone(&slot.module)),
                SlotState::Initializing => {
                    return Err(ConfigError::CyclicReference {
                        location: from.location(),
                        name: name.to_string(),
                    });
                }
                SlotState::Failed => {
                    return Err(ConfigError::invalid(
                        from.location(),
                        format!("{name} failed to initialize"),
                    ));
                }
                SlotState::Pending => *state = SlotState::Initializing,
            }
        }

        let result = self.init_module(&slot.module, &slot.node, true).await;
        *slot.state.lock() = if result.is_ok() {
            SlotState::Ready
        } else {
            SlotState::Failed
        };

        result.map(|()| Arc::clone(&slot.module))
    }

    async fn inline(
        &self,
        type_name: &str,
        args: &[String],
        node: &Node,
        prefix: Option<&str>,
    ) -> Result<Arc<dyn Module>, ConfigError> {
        let prefixed = prefix.map(|prefix| format!("{prefix}.{type_name}"));
        let (type_name, factory) = prefixed
            .as_deref()
            .and_then(|name| self.registry.lookup(name).map(|f| (name, f)))
            .or_else(|| self.registry.lookup(type_name).map(|f| (type_name, f)))
            .ok_or_else(|| ConfigError::UnknownModule {
                location: node.location(),
                name: type_name.to_string(),
            })?;

        let instance = Instance {
            type_name: type_name.to_string(),
            name: String::new(),
            aliases: Vec::new(),
            args: args.to_vec(),
        };

        let module = factory(instance).map_err(|source| ConfigError::Module {
            location: node.location(),
            name: type_name.to_string(),
            source,
        })?;

        self.init_module(&module, node, true).await?;
        Ok(module)
    }

    async fn init_module(
        &self,
        module: &Arc<dyn Module>,
        node: &Node,
        record: bool,
    ) -> Result<(), ConfigError> {
        internal!(level = DEBUG, "Initialising {}", module.instance());

        let mut cfg = ConfigMap::new(node, self);
        module.init(&mut cfg).await?;
        cfg.finish()?;

        if record {
            self.initialized.lock().push(Arc::clone(module));
        }

        Ok(())
    }

    async fn abort(&self, endpoints: &[Arc<dyn Module>]) {
        let modules: Vec<Arc<dyn Module>> = self.initialized.lock().clone();
        close_all(endpoints.iter().rev().chain(modules.iter().rev())).await;
    }
}

async fn close_all<'m>(modules: impl Iterator<Item = &'m Arc<dyn Module>>) {
    for module in modules {
        if let Some(closer) = Arc::clone(module).as_closer()
            && let Err(err) = closer.close().await
        {
            tracing::warn!(module = %module.instance(), error = %err, "Failed to close module");
        }
    }
}

/// The live set of endpoints and modules.
pub struct Graph {
    globals: Arc<Globals>,
    hooks: Arc<Hooks>,
    instances: Instances,
    named: AHashMap<String, Arc<dyn Module>>,
    endpoints: Vec<Arc<dyn Module>>,
    modules: Vec<Arc<dyn Module>>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("instances", &self.instances.names())
            .field("endpoints", &self.endpoints.len())
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

impl Graph {
    /// Instantiate and initialize every block in `nodes`.
    ///
    /// # Errors
    ///
    /// Fails on an unknown module type, a duplicate instance name or alias,
    /// an unresolvable or cyclic reference, a module rejecting its block,
    /// a block nothing refers to, or a configuration without endpoints.
    /// Endpoints initialized before the failure are closed again.
    #[tracing::instrument(level = "debug", skip_all, fields(blocks = nodes.len()))]
    pub async fn build(
        registry: Arc<Registry>,
        globals: Globals,
        hooks: Arc<Hooks>,
        nodes: &[Node],
    ) -> Result<Self, ConfigError> {
        let mut instances = Instances::default();
        let mut slots = AHashMap::new();
        let mut declared = Vec::new();
        let mut endpoints = Vec::new();

        for node in nodes {
            if let Some(factory) = registry.lookup_endpoint(&node.name) {
                let instance = Instance {
                    type_name: node.name.clone(),
                    name: node.name.clone(),
                    aliases: Vec::new(),
                    args: node.args.clone(),
                };
                let module = factory(instance).map_err(|source| ConfigError::Module {
                    location: node.location(),
                    name: node.name.clone(),
                    source,
                })?;
                endpoints.push((module, node));
                continue;
            }

            let factory = registry
                .lookup(&node.name)
                .ok_or_else(|| ConfigError::UnknownModule {
                    location: node.location(),
                    name: node.name.clone(),
                })?;

            let (name, aliases) = match node.args.split_first() {
                Some((name, aliases)) => (name.clone(), aliases.to_vec()),
                None => (node.name.clone(), Vec::new()),
            };

            if !instances.mark_instance(&name) {
                return Err(ConfigError::DuplicateName {
                    location: node.location(),
                    name,
                });
            }
            for alias in &aliases {
                if !instances.register_alias(alias, &name) {
                    return Err(ConfigError::DuplicateName {
                        location: node.location(),
                        name: alias.clone(),
                    });
                }
            }

            let instance = Instance {
                type_name: node.name.clone(),
                name: name.clone(),
                aliases: aliases.clone(),
                args: Vec::new(),
            };
            let module = factory(instance).map_err(|source| ConfigError::Module {
                location: node.location(),
                name: name.clone(),
                source,
            })?;

            let slot = Arc::new(Slot {
                module,
                node: node.clone(),
                state: Mutex::new(SlotState::Pending),
            });
            for alias in aliases {
                slots.insert(alias, Arc::clone(&slot));
            }
            slots.insert(name, Arc::clone(&slot));
            declared.push(slot);
        }

        if endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }

        let ctx = BuildContext {
            registry,
            globals: Arc::new(globals),
            hooks,
            slots,
            initialized: Mutex::new(Vec::new()),
        };

        let mut ready = Vec::with_capacity(endpoints.len());
        for (endpoint, node) in endpoints {
            if let Err(err) = ctx.init_module(&endpoint, node, false).await {
                ctx.abort(&ready).await;
                return Err(err);
            }
            ready.push(endpoint);
        }

        if let Some(unused) = declared
            .iter()
            .find(|slot| *slot.state.lock() != SlotState::Ready)
        {
            let err = ConfigError::Unused {
                location: unused.node.location(),
                name: unused.module.instance().name.clone(),
            };
            ctx.abort(&ready).await;
            return Err(err);
        }

        let named = declared
            .iter()
            .map(|slot| {
                (
                    slot.module.instance().name.clone(),
                    Arc::clone(&slot.module),
                )
            })
            .collect();
        let modules = std::mem::take(&mut *ctx.initialized.lock());

        internal!(
            level = INFO,
            "Configured {} endpoint(s) and {} module(s)",
            ready.len(),
            modules.len()
        );

        Ok(Self {
            globals: ctx.globals,
            hooks: ctx.hooks,
            instances,
            named,
            endpoints: ready,
            modules,
        })
    }

    pub fn globals(&self) -> &Arc<Globals> {
        &self.globals
    }

    pub fn hooks(&self) -> &Arc<Hooks> {
        &self.hooks
    }

    pub const fn instances(&self) -> &Instances {
        &self.instances
    }

    /// Look up a named instance by its name or one of its aliases
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.instances
            .canonical(name)
            .and_then(|canonical| self.named.get(canonical))
    }

    pub fn endpoints(&self) -> &[Arc<dyn Module>] {
        &self.endpoints
    }

    /// Every initialized non-endpoint module, inline definitions included,
    /// in the order their initialization finished.
    pub fn modules(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    /// Close every endpoint, in declaration order.
    pub async fn close_endpoints(&self) {
        close_all(self.endpoints.iter()).await;
    }

    /// Close every other module, in reverse initialization order.
    pub async fn close_modules(&self) {
        close_all(self.modules.iter().rev()).await;
    }
}

//! Modules for exercising the graph and its consumers in tests.
//!
//! * `test.endpoint` (endpoint): resolves every `use` directive.
//! * `test.module`: a closeable module that also resolves `use` directives.
//! * `test.target`: a delivery target recording what it was given.

use std::sync::{Arc, OnceLock};

use ahash::AHashMap;
use async_trait::async_trait;
use mailchat_common::{Address, Envelope, Hooks, Node, directive};
use parking_lot::Mutex;

use crate::{
    Closer, ConfigError, ConfigMap, DeliveryResult, Endpoint, Globals, Graph, Instance, Module,
    ModuleError, Registry, Target,
};

/// Shared record of `close` calls, by display name
pub type CloseLog = Arc<Mutex<Vec<String>>>;

async fn resolve_uses(cfg: &mut ConfigMap<'_>) -> Result<Vec<Arc<dyn Module>>, ConfigError> {
    let mut modules = Vec::new();
    for node in cfg.nodes("use") {
        modules.extend(cfg.resolve_all::<dyn Module>(node).await?);
    }
    Ok(modules)
}

pub struct TestEndpoint {
    instance: Instance,
    log: CloseLog,
    uses: OnceLock<Vec<Arc<dyn Module>>>,
}

impl TestEndpoint {
    pub fn uses(&self) -> &[Arc<dyn Module>] {
        self.uses.get().map_or(&[], Vec::as_slice)
    }
}

#[async_trait]
impl Module for TestEndpoint {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let uses = resolve_uses(cfg).await?;
        let _ = self.uses.set(uses);
        Ok(())
    }

    fn as_endpoint(self: Arc<Self>) -> Option<Arc<dyn Endpoint>> {
        Some(self)
    }

    fn as_closer(self: Arc<Self>) -> Option<Arc<dyn Closer>> {
        Some(self)
    }
}

impl Endpoint for TestEndpoint {
    fn addresses(&self) -> &[String] {
        &self.instance.args
    }
}

#[async_trait]
impl Closer for TestEndpoint {
    async fn close(&self) -> Result<(), ModuleError> {
        self.log.lock().push(self.instance.display_name().to_string());
        Ok(())
    }
}

pub struct TestModule {
    instance: Instance,
    log: CloseLog,
    uses: OnceLock<Vec<Arc<dyn Module>>>,
}

#[async_trait]
impl Module for TestModule {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        if cfg.bool("fail", false)? {
            return Err(ConfigError::invalid(cfg.location(), "asked to fail"));
        }

        let uses = resolve_uses(cfg).await?;
        let _ = self.uses.set(uses);
        Ok(())
    }

    fn as_closer(self: Arc<Self>) -> Option<Arc<dyn Closer>> {
        Some(self)
    }
}

#[async_trait]
impl Closer for TestModule {
    async fn close(&self) -> Result<(), ModuleError> {
        self.log.lock().push(self.instance.display_name().to_string());
        Ok(())
    }
}

/// Per-recipient failure injected into a [`MockTarget`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Temporary,
    Permanent,
}

#[derive(Default)]
struct MockState {
    failures: AHashMap<String, Failure>,
    delivered: Vec<(Envelope, Vec<Address>)>,
    attempts: usize,
}

/// Target that records deliveries and fails recipients on request.
///
/// Configured failures: `fail_temporary addr...` and `fail_permanent addr...`.
pub struct MockTarget {
    instance: Instance,
    state: Mutex<MockState>,
}

impl MockTarget {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Make deliveries to `recipient` fail, or succeed again with `None`.
    pub fn set_failure(&self, recipient: &str, failure: Option<Failure>) {
        let mut state = self.state.lock();
        let key = recipient.to_lowercase();
        match failure {
            Some(failure) => state.failures.insert(key, failure),
            None => state.failures.remove(&key),
        };
    }

    /// Successful deliveries: each call's envelope with the recipients that
    /// were accepted.
    pub fn delivered(&self) -> Vec<(Envelope, Vec<Address>)> {
        self.state.lock().delivered.clone()
    }

    /// Every accepted recipient, across all calls
    pub fn recipients(&self) -> Vec<String> {
        self.state
            .lock()
            .delivered
            .iter()
            .flat_map(|(_, recipients)| recipients.iter().map(ToString::to_string))
            .collect()
    }

    /// Number of `deliver` calls
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }
}

#[async_trait]
impl Module for MockTarget {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        for recipient in cfg.strings("fail_temporary") {
            self.set_failure(&recipient, Some(Failure::Temporary));
        }
        for recipient in cfg.strings("fail_permanent") {
            self.set_failure(&recipient, Some(Failure::Permanent));
        }
        Ok(())
    }

    fn as_target(self: Arc<Self>) -> Option<Arc<dyn Target>> {
        Some(self)
    }
}

#[async_trait]
impl Target for MockTarget {
    async fn deliver(&self, envelope: &Envelope, recipients: &[Address]) -> Vec<DeliveryResult> {
        let mut state = self.state.lock();
        state.attempts += 1;

        let mut accepted = Vec::new();
        let results = recipients
            .iter()
            .map(|recipient| match state.failures.get(&recipient.normalized()) {
                Some(Failure::Temporary) => Err(ModuleError::Temporary(format!(
                    "{recipient}: mailbox temporarily unavailable"
                ))),
                Some(Failure::Permanent) => Err(ModuleError::Permanent(format!(
                    "{recipient}: mailbox unavailable"
                ))),
                None => {
                    accepted.push(recipient.clone());
                    Ok(())
                }
            })
            .collect();

        if !accepted.is_empty() {
            state.delivered.push((envelope.clone(), accepted));
        }

        results
    }
}

/// Shared state of the test modules built from one [`Harness::registry`]
#[derive(Clone, Default)]
pub struct Harness {
    log: CloseLog,
    targets: Arc<Mutex<AHashMap<String, Arc<MockTarget>>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the test modules.
    pub fn registry(&self) -> Registry {
        let mut registry = Registry::new();

        let endpoint_log = Arc::clone(&self.log);
        let module_log = Arc::clone(&self.log);
        let targets = Arc::clone(&self.targets);
        registry
            .register_endpoint("test.endpoint", move |instance| {
                Ok(Arc::new(TestEndpoint {
                    instance,
                    log: Arc::clone(&endpoint_log),
                    uses: OnceLock::new(),
                }) as Arc<dyn Module>)
            })
            .register("test.module", move |instance| {
                Ok(Arc::new(TestModule {
                    instance,
                    log: Arc::clone(&module_log),
                    uses: OnceLock::new(),
                }) as Arc<dyn Module>)
            })
            .register("test.target", move |instance| {
                let target = Arc::new(MockTarget::new(instance));
                targets
                    .lock()
                    .insert(target.instance.display_name().to_string(), Arc::clone(&target));
                Ok(target as Arc<dyn Module>)
            });

        registry
    }

    /// Display names of closed modules, in close order
    pub fn closed(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// The `test.target` instance with the given name (the type name for
    /// inline definitions).
    pub fn target(&self, name: &str) -> Option<Arc<MockTarget>> {
        self.targets.lock().get(name).cloned()
    }
}

/// Parse `source` as a configuration file and build its graph.
///
/// # Errors
///
/// Fails if the source does not parse, or the graph does not build.
pub async fn build(registry: Registry, source: &str) -> anyhow::Result<Graph> {
    let nodes: Vec<Node> = directive::parse(source, "test.ron")?;
    let (globals, blocks) = Globals::split(nodes)?;
    let graph = Graph::build(
        Arc::new(registry),
        globals,
        Arc::new(Hooks::default()),
        &blocks,
    )
    .await?;
    Ok(graph)
}

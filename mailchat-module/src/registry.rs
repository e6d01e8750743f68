//! Module type registry.
//!
//! Every module type is registered exactly once, from the program entry
//! point, before configuration is read. Plain modules and endpoints live in
//! separate namespaces. The finished registry is installed once and is
//! read-only afterwards.

use std::sync::{Arc, OnceLock};

use ahash::AHashMap;

use crate::{Instance, Module, ModuleError};

pub type Factory = Arc<dyn Fn(Instance) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync>;

static INSTALLED: OnceLock<Arc<Registry>> = OnceLock::new();

#[derive(Default, Clone)]
pub struct Registry {
    modules: AHashMap<String, Factory>,
    endpoints: AHashMap<String, Factory>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.module_types())
            .field("endpoints", &self.endpoint_types())
            .finish()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain module type.
    ///
    /// # Panics
    ///
    /// Registering the same type name twice is a programming error.
    pub fn register<F>(&mut self, type_name: &str, factory: F) -> &mut Self
    where
        F: Fn(Instance) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync + 'static,
    {
        assert!(
            self.modules
                .insert(type_name.to_string(), Arc::new(factory))
                .is_none(),
            "module type {type_name} registered twice"
        );
        self
    }

    /// Register an endpoint type.
    ///
    /// # Panics
    ///
    /// Registering the same endpoint name twice is a programming error.
    pub fn register_endpoint<F>(&mut self, type_name: &str, factory: F) -> &mut Self
    where
        F: Fn(Instance) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync + 'static,
    {
        assert!(
            self.endpoints
                .insert(type_name.to_string(), Arc::new(factory))
                .is_none(),
            "endpoint type {type_name} registered twice"
        );
        self
    }

    pub fn lookup(&self, type_name: &str) -> Option<&Factory> {
        self.modules.get(type_name)
    }

    pub fn lookup_endpoint(&self, type_name: &str) -> Option<&Factory> {
        self.endpoints.get(type_name)
    }

    pub fn module_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn endpoint_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Make this registry the process-wide one.
    ///
    /// Returns the registry back if one was already installed.
    pub fn install(self) -> Result<Arc<Self>, Self> {
        let registry = Arc::new(self);
        INSTALLED
            .set(Arc::clone(&registry))
            .map(|()| registry)
            .map_err(|rejected| Arc::unwrap_or_clone(rejected))
    }

    /// The installed registry, if [`Registry::install`] has been called.
    pub fn installed() -> Option<Arc<Self>> {
        INSTALLED.get().cloned()
    }
}

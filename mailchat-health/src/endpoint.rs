//! The `health` endpoint module.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mailchat_common::{Event, Signal, internal};
use mailchat_module::{Closer, ConfigError, ConfigMap, Endpoint, Instance, Module, ModuleError};
use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{HealthChecker, HealthConfig, HealthServer};

/// Serves the probes on every configured address until closed.
pub struct HealthEndpoint {
    instance: Instance,
    checker: Arc<HealthChecker>,
    /// Bound addresses, with the actual port when `0` was configured.
    addresses: OnceLock<Vec<String>>,
    shutdown: broadcast::Sender<Signal>,
    servers: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthEndpoint {
    pub fn new(instance: Instance) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            instance,
            checker: Arc::new(HealthChecker::new()),
            addresses: OnceLock::new(),
            shutdown,
            servers: Mutex::new(Vec::new()),
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self::new(instance)))
    }

    pub fn checker(&self) -> &Arc<HealthChecker> {
        &self.checker
    }
}

#[async_trait]
impl Module for HealthEndpoint {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let config = HealthConfig::from_config(&self.instance.args, cfg)?;

        let mut servers = Vec::with_capacity(config.listen_addresses.len());
        let mut addresses = Vec::with_capacity(config.listen_addresses.len());
        for address in &config.listen_addresses {
            let server = HealthServer::bind(address, config.timeout, Arc::clone(&self.checker))
                .await
                .map_err(|e| ConfigError::invalid(cfg.location(), e.to_string()))?;
            let local = server
                .local_addr()
                .map_err(|e| ConfigError::invalid(cfg.location(), e.to_string()))?;
            addresses.push(local.to_string());
            servers.push(server);
        }

        {
            let mut handles = self.servers.lock();
            for server in servers {
                let shutdown = self.shutdown.subscribe();
                handles.push(tokio::spawn(async move {
                    if let Err(err) = server.serve(shutdown).await {
                        tracing::error!(error = %err, "Health check server failed");
                    }
                }));
            }
        }

        let ready = Arc::clone(&self.checker);
        cfg.hooks().add(Event::Ready, move || {
            let checker = Arc::clone(&ready);
            async move {
                checker.set_ready(true);
                Ok(())
            }
        });

        let stopping = Arc::clone(&self.checker);
        cfg.hooks().add(Event::Shutdown, move || {
            let checker = Arc::clone(&stopping);
            async move {
                checker.set_stopping();
                Ok(())
            }
        });

        internal!(
            level = INFO,
            "Health probes listening on {}",
            addresses.join(", ")
        );
        let _ = self.addresses.set(addresses);
        Ok(())
    }

    fn as_endpoint(self: Arc<Self>) -> Option<Arc<dyn Endpoint>> {
        Some(self)
    }

    fn as_closer(self: Arc<Self>) -> Option<Arc<dyn Closer>> {
        Some(self)
    }
}

impl Endpoint for HealthEndpoint {
    fn addresses(&self) -> &[String] {
        self.addresses.get().map_or(&[], Vec::as_slice)
    }
}

#[async_trait]
impl Closer for HealthEndpoint {
    async fn close(&self) -> Result<(), ModuleError> {
        self.checker.set_stopping();
        let _ = self.shutdown.send(Signal::Shutdown);

        let handles = std::mem::take(&mut *self.servers.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Health check server task failed");
            }
        }
        Ok(())
    }
}

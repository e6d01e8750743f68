use std::{path::Path, sync::Arc};

use mailchat_common::{
    Event, Hooks, Node, directive, internal,
    logging::LogHandle,
    tracing::{error, info, warn},
};
use mailchat_module::{Globals, Graph, Registry};
use tokio::sync::mpsc;

use crate::signals::Control;

/// A configured server: the module graph and its lifecycle
pub struct Controller {
    graph: Graph,
    log: Option<LogHandle>,
}

impl Controller {
    /// Read the configuration at `path` and build its graph.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, or the graph does not
    /// build.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(registry: Arc<Registry>, path: &Path) -> anyhow::Result<Self> {
        let nodes = directive::load(path)?;
        Self::build(registry, nodes).await
    }

    /// # Errors
    ///
    /// Fails if the globals are invalid or the graph does not build.
    pub async fn build(registry: Arc<Registry>, nodes: Vec<Node>) -> anyhow::Result<Self> {
        let (globals, blocks) = Globals::split(nodes)?;
        if globals.debug {
            internal!(level = INFO, "Debug mode enabled");
        }

        let graph = Graph::build(registry, globals, Arc::new(Hooks::default()), &blocks).await?;
        Ok(Self { graph, log: None })
    }

    /// Re-read `LOG_LEVEL` through `handle` on log rotation.
    #[must_use]
    pub fn with_log_handle(mut self, handle: LogHandle) -> Self {
        self.log = Some(handle);
        self
    }

    pub const fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Run the Ready hooks, then serve until shutdown is requested through
    /// `control` (or every sender is gone), and shut down.
    ///
    /// # Errors
    ///
    /// Fails if a Ready hook fails; the server is shut down first.
    pub async fn serve(self, mut control: mpsc::Receiver<Control>) -> anyhow::Result<()> {
        let failures = self.graph.hooks().run(Event::Ready).await;
        if let Some(failure) = failures.into_iter().next() {
            error!(error = %failure, "Failed to start");
            self.shutdown().await;
            return Err(failure);
        }

        info!(
            endpoints = self.graph.endpoints().len(),
            modules = self.graph.modules().len(),
            "Server started"
        );

        while let Some(request) = control.recv().await {
            match request {
                Control::Shutdown => break,
                Control::LogRotate => self.rotate_logs().await,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn rotate_logs(&self) {
        if let Some(handle) = &self.log {
            match handle.reload() {
                Ok(level) => internal!(level = INFO, "Log level is now {level}"),
                Err(err) => warn!(error = %err, "Failed to reload the log level"),
            }
        }

        for err in self.graph.hooks().run(Event::LogRotate).await {
            warn!(error = %err, "Log rotation hook failed");
        }
    }

    /// Close the endpoints, run the Shutdown hooks, then close every other
    /// module in reverse initialization order.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn shutdown(self) {
        internal!(level = INFO, "Shutting down...");

        self.graph.close_endpoints().await;

        for err in self.graph.hooks().run(Event::Shutdown).await {
            warn!(error = %err, "Shutdown hook failed");
        }

        self.graph.close_modules().await;

        internal!(level = INFO, "Shutdown complete");
    }
}

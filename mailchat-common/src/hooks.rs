//! Lifecycle hooks.
//!
//! Modules register callbacks for process-wide events while they are being
//! initialized. Callbacks run in registration order; a failing callback is
//! logged and does not stop the ones after it.

use std::{
    fmt::{self, Display},
    future::Future,
    sync::Arc,
};

use futures_util::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;

use crate::internal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Every endpoint and module is initialized.
    Ready,
    /// Log files should be reopened.
    LogRotate,
    /// The process is stopping; endpoints are already closed.
    Shutdown,
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::LogRotate => "log-rotate",
            Self::Shutdown => "shutdown",
        })
    }
}

type Callback = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Default)]
pub struct Hooks {
    registered: Mutex<Vec<(Event, Callback)>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("registered", &self.registered.lock().len())
            .finish()
    }
}

impl Hooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback for `event`
    pub fn add<F, Fut>(&self, event: Event, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: Callback = Arc::new(move || callback().boxed());
        self.registered.lock().push((event, callback));
    }

    /// Number of callbacks registered for `event`
    pub fn count(&self, event: Event) -> usize {
        self.registered
            .lock()
            .iter()
            .filter(|(registered, _)| *registered == event)
            .count()
    }

    /// Run every callback registered for `event`, in order, returning the
    /// errors they produced.
    pub async fn run(&self, event: Event) -> Vec<anyhow::Error> {
        // Callbacks may register further hooks, so the lock is not held while
        // they run.
        let callbacks: Vec<Callback> = self
            .registered
            .lock()
            .iter()
            .filter(|(registered, _)| *registered == event)
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        internal!(
            level = DEBUG,
            "Running {} {event} hook(s)",
            callbacks.len()
        );

        let mut errors = Vec::new();
        for callback in callbacks {
            if let Err(err) = callback().await {
                tracing::error!(%event, error = %err, "Hook failed");
                errors.push(err);
            }
        }

        errors
    }
}

//! Health check endpoints for MailChat
//!
//! The `health` endpoint serves HTTP liveness and readiness probes.
//!
//! # Endpoints
//!
//! - **`/health/live`** - Liveness probe: Returns 200 if the process is running
//! - **`/health/ready`** - Readiness probe: Returns 200 once the server is
//!   configured and started, and 503 again as soon as shutdown begins
//!
//! # Usage
//!
//! ```rust,no_run
//! use mailchat_health::{HealthChecker, HealthServer};
//! use std::{sync::Arc, time::Duration};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let checker = Arc::new(HealthChecker::new());
//! let server = HealthServer::bind("[::]:8080", Duration::from_secs(1), checker).await?;
//!
//! // server.serve(shutdown_receiver).await?;
//! # Ok(())
//! # }
//! ```

mod checker;
mod config;
mod endpoint;
mod error;
mod server;

pub use checker::{HealthChecker, HealthStatus};
pub use config::HealthConfig;
pub use endpoint::HealthEndpoint;
pub use error::HealthError;
pub use server::{HealthServer, router};

use mailchat_module::Registry;

/// Register the `health` endpoint.
pub fn register(registry: &mut Registry) {
    registry.register_endpoint("health", HealthEndpoint::factory);
}

//! Health check HTTP server

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use mailchat_common::Signal;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{HealthChecker, HealthError};

/// `/health/live` and `/health/ready` on one listener
pub struct HealthServer {
    listener: TcpListener,
    router: Router,
}

/// The probe routes, answering within `timeout`.
pub fn router(health_checker: Arc<HealthChecker>, timeout: Duration) -> Router {
    Router::new()
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(health_checker)
        .layer(TimeoutLayer::new(timeout))
}

impl HealthServer {
    /// # Errors
    ///
    /// Returns an error if binding to `address` fails.
    pub async fn bind(
        address: &str,
        timeout: Duration,
        health_checker: Arc<HealthChecker>,
    ) -> Result<Self, HealthError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| HealthError::BindError {
                address: address.to_string(),
                source,
            })?;

        tracing::info!(address, "Health check server bound successfully");

        Ok(Self {
            listener,
            router: router(health_checker, timeout),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, HealthError> {
        self.listener
            .local_addr()
            .map_err(|e| HealthError::ServerError(e.to_string()))
    }

    /// Run the server until a shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), HealthError> {
        tracing::info!("Health check server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Health check server received shutdown signal");
            })
            .await
            .map_err(|e| HealthError::ServerError(e.to_string()))?;

        tracing::info!("Health check server stopped");
        Ok(())
    }
}

async fn liveness_handler(State(health_checker): State<Arc<HealthChecker>>) -> Response {
    if health_checker.is_alive() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

/// 200 once ready; 503 with the detailed status otherwise.
async fn readiness_handler(State(health_checker): State<Arc<HealthChecker>>) -> Response {
    if health_checker.is_ready() {
        (StatusCode::OK, "OK").into_response()
    } else {
        let status = health_checker.status();
        tracing::warn!(
            ready = status.ready,
            stopping = status.stopping,
            uptime_secs = status.uptime_secs,
            "Readiness probe failed"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}

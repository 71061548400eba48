//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, stream status reporting, and Prometheus
//! metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness check (simple OK)
//! - `GET /readyz` - Readiness check (stream connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::ConnectionState;
use crate::infrastructure::kis::StreamingClient;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Stream connection status.
    pub stream: StreamInfo,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream connected.
    Healthy,
    /// Stream connecting or reconnecting.
    Degraded,
    /// Stream down or client closed.
    Unhealthy,
}

/// Stream connection status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// Connection state.
    pub state: &'static str,
    /// Whether the stream is connected.
    pub connected: bool,
    /// Sessions established since startup.
    pub sessions_established: u64,
    /// Whether the client was closed.
    pub closed: bool,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Registered symbols.
    pub symbols: usize,
    /// Registered price tick handlers.
    pub price_handlers: usize,
    /// Registered order book handlers.
    pub order_book_handlers: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    client: Arc<StreamingClient>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, client: Arc<StreamingClient>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            client,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");
        serve(listener, self.state, self.cancel).await?;
        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Serve the health routes on an already-bound listener until cancelled.
///
/// # Errors
///
/// Returns `HealthServerError::ServerFailed` if the HTTP server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
) -> Result<(), HealthServerError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HealthServerError::ServerFailed(e.to_string()))
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.client.state().is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let client = &state.client;
    let connection = client.state();
    let closed = client.is_closed();

    HealthResponse {
        status: determine_health_status(connection, closed),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream: StreamInfo {
            state: connection.as_str(),
            connected: connection.is_connected(),
            sessions_established: client.sessions_established(),
            closed,
        },
        subscriptions: SubscriptionStatus {
            symbols: client.subscriptions().len(),
            price_handlers: client.dispatcher().price_handler_count(),
            order_book_handlers: client.dispatcher().order_book_handler_count(),
        },
    }
}

const fn determine_health_status(state: ConnectionState, closed: bool) -> HealthStatus {
    if closed {
        return HealthStatus::Unhealthy;
    }
    match state {
        ConnectionState::Connected => HealthStatus::Healthy,
        ConnectionState::Connecting => HealthStatus::Degraded,
        ConnectionState::Disconnected => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

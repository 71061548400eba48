//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations behind the application layer: the KIS REST and
//! WebSocket clients plus the process-level plumbing around them.

/// KIS Open API clients (auth, REST quotes, real-time stream).
pub mod kis;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! KIS Quote Stream - Real-time Quote Ingestion
//!
//! Client for the Korea Investment & Securities (KIS) Open API: keeps the
//! access token and WebSocket approval key fresh, serves REST quote
//! snapshots, and maintains a subscription stream whose caret-delimited
//! frames are decoded into typed records for registered handlers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Quote types and the subscription registry
//!   - `streaming`: Price ticks, snapshots, order books, connection state
//!   - `subscription`: Set of symbols the stream should carry
//!
//! - **Application**: Ports and services
//!   - `ports`: Clock and handler traits
//!   - `services`: Callback dispatcher
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kis`: Token store, REST client, codec, streaming client
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                 ┌────────────┐   approval key   ┌─────────────────┐
//! KIS OAuth ─────►│ TokenStore │─────────────────►│ StreamingClient │◄── KIS WebSocket
//!                 └────────────┘                  └────────┬────────┘
//!                       │ access token                     │ MessageCodec
//!                       ▼                                  ▼
//!              ┌─────────────────┐               ┌────────────────────┐
//!              │ RestQuoteClient │               │ CallbackDispatcher │──► handlers
//!              └─────────────────┘               └────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quote types with no external dependencies.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    ConnectionState, MarketRecord, ORDER_BOOK_DEPTH, OrderBookSnapshot, PriceSnapshot, PriceTick,
    Symbol,
};
pub use domain::subscription::SubscriptionRegistry;

// Application
pub use application::ports::{Clock, FixedClock, OrderBookHandler, PriceTickHandler, SystemClock};
pub use application::services::{CallbackDispatcher, DispatchReport};

// Infrastructure config
pub use infrastructure::config::{
    AccountNumber, ConfigError, Credentials, Environment, HttpSettings, KisConfig,
    ServerSettings, StreamSettings,
};

// KIS clients
pub use infrastructure::kis::{
    AccessToken, ApprovalKey, AuthError, CodecError, Frame, MessageCodec, RealtimeChannel,
    RestQuoteClient, StreamError, StreamingClient, StreamingClientConfig, TokenCache,
    TokenStore, build_http_client,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

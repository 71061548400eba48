//! KIS Open API Adapters
//!
//! Credential management, REST quote snapshots, and the real-time
//! WebSocket stream.
//!
//! # Components
//!
//! - `auth`: Access token and approval key ([`TokenStore`])
//! - `token_cache`: Token file shared across processes
//! - `rest`: Quote snapshots ([`RestQuoteClient`])
//! - `messages`: Wire DTOs
//! - `codec`: Caret-delimited frame decoding ([`MessageCodec`])
//! - `liveness`: Ping and idle watchdog
//! - `reconnect`: Backoff policy
//! - `stream`: Subscription session ([`StreamingClient`])

pub mod auth;
pub mod codec;
pub mod liveness;
pub mod messages;
pub mod reconnect;
pub mod rest;
pub mod stream;
pub mod token_cache;

pub use auth::{AccessToken, ApprovalKey, AuthError, TokenStore};
pub use codec::{CodecError, Frame, MessageCodec};
pub use liveness::LivenessConfig;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::RestQuoteClient;
pub use stream::{RealtimeChannel, StreamError, StreamingClient, StreamingClientConfig};
pub use token_cache::{TokenCache, TokenCacheError};

use crate::infrastructure::config::HttpSettings;

/// Build the HTTP client shared by the token store and REST client.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client(settings: &HttpSettings) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.timeout)
        .user_agent(concat!("kis-quote-stream/", env!("CARGO_PKG_VERSION")))
        .build()
}

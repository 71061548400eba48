//! KIS Streaming Client
//!
//! Maintains one WebSocket session to the KIS real-time endpoint, keeps the
//! server-side subscriptions in sync with the [`SubscriptionRegistry`], and
//! routes decoded records to the [`CallbackDispatcher`].
//!
//! # Session Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──socket open──► Connected
//!       ▲                          │                          │
//!       └──── auth/socket error ───┘◄──── close/error/idle ───┘
//! ```
//!
//! On every transition to `Connected` the registry is snapshotted and one
//! subscribe frame per symbol (per channel) is sent before any frame is
//! read. The snapshot and installation of the outbound channel happen under
//! the same lock `subscribe` takes, so a concurrent `subscribe` is either
//! part of the snapshot or delivered through the channel, never both and
//! never neither.
//!
//! [`StreamingClient::run`] wraps `connect` in a [`ReconnectPolicy`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::auth::{ApprovalKey, AuthError, TokenStore};
use super::codec::{CodecError, Frame, MessageCodec};
use super::liveness::{ActivityTracker, LivenessConfig, LivenessEvent, LivenessWatchdog};
use super::messages::{CUSTOMER_TYPE_PERSONAL, SubscribeRequest, TR_ORDER_BOOK, TR_PRICE_TICK, TrType};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::Clock;
use crate::application::services::CallbackDispatcher;
use crate::domain::streaming::{ConnectionState, MarketRecord, PriceTick, Symbol};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics::{self, FrameKind};

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the streaming client.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Approval key could not be obtained.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Outbound frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Nothing received for the idle timeout.
    #[error("connection idle timeout")]
    IdleTimeout,

    /// A session is already active.
    #[error("already connected")]
    AlreadyConnected,

    /// The client was closed.
    #[error("client is shut down")]
    Shutdown,

    /// Symbol was empty.
    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// Reconnection budget exhausted.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

impl StreamError {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::WebSocket(_) => "websocket",
            Self::Codec(_) => "codec",
            Self::ConnectionClosed => "closed",
            Self::IdleTimeout => "idle_timeout",
            Self::AlreadyConnected => "already_connected",
            Self::Shutdown => "shutdown",
            Self::InvalidSymbol(_) => "invalid_symbol",
            Self::MaxReconnectAttemptsExceeded(_) => "max_reconnects",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Real-time stream a symbol is subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeChannel {
    /// Trade prints (`H0STCNT0`).
    Price,
    /// Ten-level order book (`H0STASP0`).
    OrderBook,
}

impl RealtimeChannel {
    /// Stream transaction id.
    #[must_use]
    pub const fn tr_id(self) -> &'static str {
        match self {
            Self::Price => TR_PRICE_TICK,
            Self::OrderBook => TR_ORDER_BOOK,
        }
    }
}

/// Configuration for the streaming client.
#[derive(Debug, Clone)]
pub struct StreamingClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Customer type sent in subscribe headers.
    pub customer_type: String,
    /// Streams each symbol is subscribed to.
    pub channels: Vec<RealtimeChannel>,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Liveness watchdog configuration.
    pub liveness: LivenessConfig,
}

impl StreamingClientConfig {
    /// Price stream only, default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            customer_type: CUSTOMER_TYPE_PERSONAL.to_string(),
            channels: vec![RealtimeChannel::Price],
            reconnect: ReconnectConfig::default(),
            liveness: LivenessConfig::default(),
        }
    }

    /// Build from streaming settings.
    #[must_use]
    pub fn from_settings(settings: &StreamSettings) -> Self {
        let mut channels = vec![RealtimeChannel::Price];
        if settings.order_book {
            channels.push(RealtimeChannel::OrderBook);
        }
        Self {
            channels,
            reconnect: ReconnectConfig::from_stream_settings(settings),
            liveness: LivenessConfig::new(settings.heartbeat_interval, settings.idle_timeout),
            ..Self::new(settings.url.clone())
        }
    }
}

// =============================================================================
// Streaming Client
// =============================================================================

#[derive(Debug)]
enum Outbound {
    Subscribe(Symbol),
    Unsubscribe(Symbol),
}

#[derive(Debug, Default)]
struct Session {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

/// Resets the session to `Disconnected` however `connect` exits.
struct SessionReset<'a>(&'a Mutex<Session>);

impl Drop for SessionReset<'_> {
    fn drop(&mut self) {
        let mut session = self.0.lock();
        session.state = ConnectionState::Disconnected;
        session.outbound = None;
        metrics::set_connected(false);
    }
}

/// KIS real-time quote client.
///
/// Share as `Arc<StreamingClient>`: one task drives [`StreamingClient::run`]
/// while any thread may call `subscribe`, `unsubscribe`, or `close`.
pub struct StreamingClient {
    config: StreamingClientConfig,
    tokens: Arc<TokenStore>,
    codec: MessageCodec,
    dispatcher: Arc<CallbackDispatcher>,
    registry: SubscriptionRegistry,
    session: Mutex<Session>,
    sessions_established: AtomicU64,
    latest: RwLock<HashMap<Symbol, PriceTick>>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .field("subscriptions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl StreamingClient {
    /// Create a client. No I/O happens until [`connect`](Self::connect) or
    /// [`run`](Self::run).
    #[must_use]
    pub fn new(
        config: StreamingClientConfig,
        tokens: Arc<TokenStore>,
        dispatcher: Arc<CallbackDispatcher>,
    ) -> Self {
        let clock = tokens.clock();
        Self {
            config,
            tokens,
            codec: MessageCodec::new(),
            dispatcher,
            registry: SubscriptionRegistry::new(),
            session: Mutex::new(Session::default()),
            sessions_established: AtomicU64::new(0),
            latest: RwLock::new(HashMap::new()),
            clock,
            cancel: CancellationToken::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Add a symbol to the stream.
    ///
    /// Returns `true` if the symbol was new. A new symbol is subscribed on
    /// the live session immediately, or on the next connect otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Shutdown`] after [`close`](Self::close) and
    /// [`StreamError::InvalidSymbol`] for an empty symbol.
    pub fn subscribe(&self, symbol: &str) -> Result<bool, StreamError> {
        let symbol = self.validate(symbol)?;

        let session = self.session.lock();
        let added = self.registry.insert(symbol.clone());
        if added && let Some(outbound) = &session.outbound {
            let _ = outbound.send(Outbound::Subscribe(symbol.clone()));
        }
        drop(session);

        metrics::set_subscriptions(self.registry.len());
        if added {
            tracing::info!(symbol = %symbol, "Subscribed");
        }
        Ok(added)
    }

    /// Remove a symbol from the stream.
    ///
    /// Returns `true` if the symbol was registered.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&self, symbol: &str) -> Result<bool, StreamError> {
        let symbol = self.validate(symbol)?;

        let session = self.session.lock();
        let removed = self.registry.remove(&symbol);
        if removed && let Some(outbound) = &session.outbound {
            let _ = outbound.send(Outbound::Unsubscribe(symbol.clone()));
        }
        drop(session);

        metrics::set_subscriptions(self.registry.len());
        if removed {
            tracing::info!(symbol = %symbol, "Unsubscribed");
        }
        Ok(removed)
    }

    fn validate(&self, symbol: &str) -> Result<Symbol, StreamError> {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Shutdown);
        }
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(StreamError::InvalidSymbol(symbol.to_string()));
        }
        Ok(symbol.to_string())
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.lock().state
    }

    /// Registered symbols, sorted.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Symbol> {
        self.registry.snapshot()
    }

    /// Most recent trade print for `symbol`, if any arrived.
    #[must_use]
    pub fn latest_price(&self, symbol: &str) -> Option<PriceTick> {
        self.latest.read().get(symbol).cloned()
    }

    /// Dispatcher records are routed to.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<CallbackDispatcher> {
        &self.dispatcher
    }

    /// Number of sessions that reached `Connected`.
    #[must_use]
    pub fn sessions_established(&self) -> u64 {
        self.sessions_established.load(Ordering::SeqCst)
    }

    /// Check if [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Stop the client. Any active session ends promptly and later calls to
    /// `subscribe`, `connect`, or `run` fail or return immediately.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("Closing streaming client");
        }
        self.cancel.cancel();
    }

    /// Run sessions until [`close`](Self::close), reconnecting with backoff.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Auth`] if the approval key cannot be obtained
    /// and [`StreamError::MaxReconnectAttemptsExceeded`] once the
    /// reconnection budget is spent.
    pub async fn run(&self) -> Result<(), StreamError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let established = self.sessions_established();
            let result = self.connect().await;
            if self.sessions_established() > established {
                policy.reset();
            }

            match result {
                Ok(()) | Err(StreamError::Shutdown) => {
                    tracing::info!("Streaming client stopped");
                    return Ok(());
                }
                Err(e @ (StreamError::Auth(_) | StreamError::AlreadyConnected)) => {
                    tracing::error!(error = %e, "Streaming client cannot continue");
                    metrics::record_stream_error(e.kind());
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Streaming session ended");
                    metrics::record_stream_error(e.kind());
                }
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    attempts = policy.attempt_count(),
                    "Reconnection attempts exhausted"
                );
                return Err(StreamError::MaxReconnectAttemptsExceeded(
                    policy.max_attempts(),
                ));
            };

            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to KIS stream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one session.
    ///
    /// Returns `Ok(())` only when the client is closed; any other end of the
    /// session is an error. The state is `Disconnected` on return.
    ///
    /// # Errors
    ///
    /// Returns an error if the approval key cannot be obtained, the socket
    /// cannot be opened, or the session ends for any reason but `close`.
    pub async fn connect(&self) -> Result<(), StreamError> {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Shutdown);
        }
        {
            let mut session = self.session.lock();
            if session.state != ConnectionState::Disconnected {
                return Err(StreamError::AlreadyConnected);
            }
            session.state = ConnectionState::Connecting;
        }
        let _reset = SessionReset(&self.session);

        self.run_session().await
    }

    async fn run_session(&self) -> Result<(), StreamError> {
        let approval = self.tokens.get_approval_key().await?;

        tracing::info!(url = %self.config.url, "Connecting to KIS stream");
        let ws_stream = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(self.config.url.as_str()) => connected?.0,
        };
        let (mut write, mut read) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let symbols = {
            let mut session = self.session.lock();
            session.outbound = Some(outbound_tx);
            session.state = ConnectionState::Connected;
            self.registry.snapshot()
        };
        self.sessions_established.fetch_add(1, Ordering::SeqCst);
        metrics::set_connected(true);
        tracing::info!(symbols = symbols.len(), "KIS stream connected");

        for symbol in &symbols {
            self.send_request(&mut write, &approval, TrType::Register, symbol)
                .await?;
        }

        let activity = Arc::new(ActivityTracker::new());
        let (liveness_tx, mut liveness_rx) = mpsc::channel(4);
        let watchdog_cancel = self.cancel.child_token();
        let _watchdog_guard = watchdog_cancel.clone().drop_guard();
        tokio::spawn(
            LivenessWatchdog::new(
                self.config.liveness.clone(),
                Arc::clone(&activity),
                liveness_tx,
                watchdog_cancel,
            )
            .run(),
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(event) = liveness_rx.recv() => match event {
                    LivenessEvent::SendPing => {
                        write.send(Message::Ping(Vec::new().into())).await?;
                    }
                    LivenessEvent::IdleTimeout => return Err(StreamError::IdleTimeout),
                },
                Some(command) = outbound_rx.recv() => {
                    let (tr_type, symbol) = match command {
                        Outbound::Subscribe(symbol) => (TrType::Register, symbol),
                        Outbound::Unsubscribe(symbol) => (TrType::Unregister, symbol),
                    };
                    self.send_request(&mut write, &approval, tr_type, &symbol).await?;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        activity.record_activity();
                        self.handle_frame(&text);
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        activity.record_activity();
                        if let Ok(text) = std::str::from_utf8(&bytes) {
                            self.handle_frame(text);
                        } else {
                            metrics::record_decode_error();
                            tracing::debug!(len = bytes.len(), "Dropping non-UTF-8 frame");
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        activity.record_activity();
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => activity.record_activity(),
                    Some(Ok(Message::Close(close))) => {
                        tracing::info!(frame = ?close, "Server sent close frame");
                        return Err(StreamError::ConnectionClosed);
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(StreamError::ConnectionClosed),
                },
            }
        }
    }

    async fn send_request<W>(
        &self,
        write: &mut W,
        approval: &ApprovalKey,
        tr_type: TrType,
        symbol: &str,
    ) -> Result<(), StreamError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        for channel in &self.config.channels {
            let request = SubscribeRequest::new(
                approval.as_str(),
                &self.config.customer_type,
                tr_type,
                channel.tr_id(),
                symbol,
            );
            let text = self.codec.encode_subscribe(&request)?;
            write.send(Message::Text(text.into())).await?;
            tracing::debug!(symbol, tr_id = channel.tr_id(), ?tr_type, "Sent subscription request");
        }
        Ok(())
    }

    /// Decode one inbound frame and dispatch its records. Never fails: a
    /// bad frame is logged and dropped.
    fn handle_frame(&self, raw: &str) {
        match self.codec.decode(raw, self.clock.now()) {
            Ok(Frame::Records(records)) => {
                metrics::record_frame_received(FrameKind::Data);
                for record in &records {
                    if let MarketRecord::PriceTick(tick) = record {
                        self.latest
                            .write()
                            .insert(tick.symbol.clone(), tick.clone());
                    }
                    self.dispatcher.dispatch(record);
                }
            }
            Ok(Frame::Heartbeat) => {
                metrics::record_frame_received(FrameKind::Heartbeat);
                tracing::trace!("Heartbeat received");
            }
            Ok(Frame::Control(message)) => {
                metrics::record_frame_received(FrameKind::Control);
                let body = message.body.as_ref();
                if message.is_error() {
                    tracing::warn!(
                        tr_id = %message.header.tr_id,
                        tr_key = ?message.header.tr_key,
                        code = ?body.map(|b| &b.msg_cd),
                        msg = ?body.map(|b| &b.msg1),
                        "Subscription rejected"
                    );
                } else {
                    tracing::debug!(
                        tr_id = %message.header.tr_id,
                        tr_key = ?message.header.tr_key,
                        msg = ?body.map(|b| &b.msg1),
                        "Control message"
                    );
                }
            }
            Ok(Frame::Unknown { tr_id }) => {
                metrics::record_frame_received(FrameKind::Unknown);
                tracing::debug!(tr_id = %tr_id, "Ignoring frame for unhandled stream");
            }
            Err(e) => {
                metrics::record_decode_error();
                tracing::debug!(error = %e, "Dropping malformed frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::application::ports::SystemClock;
    use crate::infrastructure::config::Credentials;
    use crate::infrastructure::kis::token_cache::TokenCache;

    fn client() -> StreamingClient {
        let tokens = TokenStore::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            Credentials::new("key".to_string(), "secret".to_string()),
            TokenCache::new(std::env::temp_dir().join("kis-stream-unit-token.json")),
            Arc::new(SystemClock),
        )
        .unwrap();
        StreamingClient::new(
            StreamingClientConfig::new("ws://127.0.0.1:9"),
            Arc::new(tokens),
            Arc::new(CallbackDispatcher::new()),
        )
    }

    #[test]
    fn subscribe_is_idempotent_while_disconnected() {
        let client = client();
        assert!(client.subscribe("005930").unwrap());
        assert!(!client.subscribe(" 005930 ").unwrap());
        assert_eq!(client.subscriptions(), vec!["005930".to_string()]);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn empty_symbol_is_rejected() {
        let client = client();
        assert!(matches!(
            client.subscribe("  "),
            Err(StreamError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn unsubscribe_removes_symbol() {
        let client = client();
        client.subscribe("005930").unwrap();
        assert!(client.unsubscribe("005930").unwrap());
        assert!(!client.unsubscribe("005930").unwrap());
        assert!(client.subscriptions().is_empty());
    }

    #[test]
    fn subscribe_after_close_fails() {
        let client = client();
        client.close();
        assert!(client.is_closed());
        assert!(matches!(client.subscribe("005930"), Err(StreamError::Shutdown)));
    }

    #[tokio::test]
    async fn connect_after_close_fails_fast() {
        let client = client();
        client.close();
        assert!(matches!(client.connect().await, Err(StreamError::Shutdown)));
        assert!(client.run().await.is_ok());
    }

    #[test]
    fn handled_frames_update_latest_price_and_dispatch() {
        let client = client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client
            .dispatcher()
            .register_price_handler(move |tick: &PriceTick| -> anyhow::Result<()> {
                sink.lock().push(tick.price);
                Ok(())
            });

        client.handle_frame("0|H0STCNT0|1|005930^0^70000^500^0.71^x^x^x^x^x^x^x^1000000");
        client.handle_frame(r#"{"header":{"tr_id":"PINGPONG","datetime":"20240102090000"}}"#);
        client.handle_frame("0|H0STCNT0");
        client.handle_frame("0|H0STCNT0|1|005930^0^70100^600^0.85^x^x^x^x^x^x^x^1000100");

        assert_eq!(*seen.lock(), vec![70_000, 70_100]);
        let latest = client.latest_price("005930").unwrap();
        assert_eq!(latest.price, 70_100);
        assert!(latest.timestamp <= Utc::now());
        assert!(client.latest_price("000660").is_none());
    }

    #[test]
    fn order_book_channel_is_opt_in() {
        let mut settings = crate::infrastructure::config::KisConfig::from_lookup(|key| match key {
            "KIS_APP_KEY" | "KIS_APP_SECRET" => Some("x".to_string()),
            "KIS_ACCOUNT_NO" => Some("12345678-01".to_string()),
            _ => None,
        })
        .unwrap()
        .stream;

        let config = StreamingClientConfig::from_settings(&settings);
        assert_eq!(config.channels, vec![RealtimeChannel::Price]);

        settings.order_book = true;
        let config = StreamingClientConfig::from_settings(&settings);
        assert_eq!(
            config.channels,
            vec![RealtimeChannel::Price, RealtimeChannel::OrderBook]
        );
        assert_eq!(config.reconnect.max_attempts, 10);
    }
}

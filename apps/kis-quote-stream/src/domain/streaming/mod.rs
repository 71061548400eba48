//! Market Data Records
//!
//! Canonical, codec-agnostic records for KIS domestic equities:
//!
//! - [`PriceTick`]: one real-time trade print (`H0STCNT0` stream)
//! - [`PriceSnapshot`]: REST current-price inquiry result
//! - [`OrderBookSnapshot`]: 10-level book (REST inquiry or `H0STASP0` stream)
//!
//! Prices are integer KRW. Change rates are percentages carried as
//! [`Decimal`] so `0.71` stays `0.71`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange ticker identifier (e.g. `"005930"`).
pub type Symbol = String;

/// Number of price levels per side in an order book.
pub const ORDER_BOOK_DEPTH: usize = 10;

// =============================================================================
// Price Records
// =============================================================================

/// A real-time trade print decoded from the price stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Ticker.
    pub symbol: Symbol,
    /// Last traded price (KRW).
    pub price: i64,
    /// Change versus previous close (KRW, signed).
    pub change: i64,
    /// Change versus previous close, in percent.
    pub change_rate: Decimal,
    /// Traded volume.
    pub volume: u64,
    /// Capture time. The wire frame carries no usable timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Current-price inquiry result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Ticker.
    pub symbol: Symbol,
    /// Current price (KRW).
    pub price: i64,
    /// Change versus previous close (KRW, signed).
    pub change: i64,
    /// Change versus previous close, in percent.
    pub change_rate: Decimal,
    /// Accumulated session volume.
    pub volume: u64,
    /// Session open.
    pub open: i64,
    /// Session high.
    pub high: i64,
    /// Session low.
    pub low: i64,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Order Book
// =============================================================================

/// Ten-level order book. Index 0 is the best level on each side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Ticker.
    pub symbol: Symbol,
    /// Ask prices, best (lowest) first.
    pub ask_prices: [i64; ORDER_BOOK_DEPTH],
    /// Resting ask volume per level.
    pub ask_volumes: [u64; ORDER_BOOK_DEPTH],
    /// Bid prices, best (highest) first.
    pub bid_prices: [i64; ORDER_BOOK_DEPTH],
    /// Resting bid volume per level.
    pub bid_volumes: [u64; ORDER_BOOK_DEPTH],
    /// Capture time.
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    /// Best ask price.
    #[must_use]
    pub const fn best_ask(&self) -> i64 {
        self.ask_prices[0]
    }

    /// Best bid price.
    #[must_use]
    pub const fn best_bid(&self) -> i64 {
        self.bid_prices[0]
    }

    /// Best ask minus best bid.
    #[must_use]
    pub const fn spread(&self) -> i64 {
        self.best_ask() - self.best_bid()
    }

    /// Total resting volume on the ask side.
    #[must_use]
    pub fn total_ask_volume(&self) -> u64 {
        self.ask_volumes.iter().sum()
    }

    /// Total resting volume on the bid side.
    #[must_use]
    pub fn total_bid_volume(&self) -> u64 {
        self.bid_volumes.iter().sum()
    }
}

// =============================================================================
// Dispatchable Record
// =============================================================================

/// A decoded real-time record, the unit routed to consumer handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketRecord {
    /// Trade print.
    PriceTick(PriceTick),
    /// Order book update.
    OrderBook(OrderBookSnapshot),
}

impl MarketRecord {
    /// Ticker the record belongs to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::PriceTick(tick) => &tick.symbol,
            Self::OrderBook(book) => &book.symbol,
        }
    }

    /// Short label used for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PriceTick(_) => "price_tick",
            Self::OrderBook(_) => "order_book",
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Streaming connection state, owned by the streaming client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Credential fetch / socket handshake in progress.
    Connecting,
    /// Socket open and subscriptions restored.
    Connected,
}

impl ConnectionState {
    /// Check if the stream is connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

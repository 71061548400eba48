//! Port Interfaces
//!
//! Contracts between the application core and the outside world.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`Clock`]: Wall-clock source, swapped for [`FixedClock`] in tests
//!
//! ## Driver Ports (Inbound)
//!
//! - [`PriceTickHandler`]: Consumer of real-time trade prints
//! - [`OrderBookHandler`]: Consumer of real-time order book updates
//!
//! Handlers are plain synchronous callbacks. Any `Fn(&T) -> anyhow::Result<()>`
//! closure that is `Send + Sync` implements the matching trait.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::domain::streaming::{OrderBookSnapshot, PriceTick};

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// =============================================================================
// Consumer Handlers
// =============================================================================

/// Consumer of decoded trade prints.
pub trait PriceTickHandler: Send + Sync {
    /// Handle one tick. An error is logged and does not affect other handlers.
    ///
    /// # Errors
    ///
    /// Any consumer-side failure.
    fn on_price_tick(&self, tick: &PriceTick) -> anyhow::Result<()>;
}

impl<F> PriceTickHandler for F
where
    F: Fn(&PriceTick) -> anyhow::Result<()> + Send + Sync,
{
    fn on_price_tick(&self, tick: &PriceTick) -> anyhow::Result<()> {
        self(tick)
    }
}

/// Consumer of decoded order book updates.
pub trait OrderBookHandler: Send + Sync {
    /// Handle one order book. An error is logged and does not affect other handlers.
    ///
    /// # Errors
    ///
    /// Any consumer-side failure.
    fn on_order_book(&self, book: &OrderBookSnapshot) -> anyhow::Result<()>;
}

impl<F> OrderBookHandler for F
where
    F: Fn(&OrderBookSnapshot) -> anyhow::Result<()> + Send + Sync,
{
    fn on_order_book(&self, book: &OrderBookSnapshot) -> anyhow::Result<()> {
        self(book)
    }
}

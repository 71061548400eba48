//! Callback Dispatcher
//!
//! Routes each decoded [`MarketRecord`] to every handler registered for its
//! kind, in registration order. A handler that returns an error or panics
//! is logged and skipped; the remaining handlers still run.
//!
//! Registration may happen from any thread while dispatch is running. The
//! handler list is copied out of the lock before invocation, so a handler
//! may itself register further handlers without deadlocking.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::{OrderBookHandler, PriceTickHandler};
use crate::domain::streaming::MarketRecord;
use crate::infrastructure::metrics;

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Fan-out of decoded records to consumer callbacks.
#[derive(Default)]
pub struct CallbackDispatcher {
    price_handlers: RwLock<Vec<Arc<dyn PriceTickHandler>>>,
    order_book_handlers: RwLock<Vec<Arc<dyn OrderBookHandler>>>,
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("price_handlers", &self.price_handlers.read().len())
            .field("order_book_handlers", &self.order_book_handlers.read().len())
            .finish()
    }
}

impl CallbackDispatcher {
    /// Create a dispatcher with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trade print handler.
    pub fn register_price_handler<H>(&self, handler: H)
    where
        H: PriceTickHandler + 'static,
    {
        self.price_handlers.write().push(Arc::new(handler));
    }

    /// Register an order book handler.
    pub fn register_order_book_handler<H>(&self, handler: H)
    where
        H: OrderBookHandler + 'static,
    {
        self.order_book_handlers.write().push(Arc::new(handler));
    }

    /// Number of registered trade print handlers.
    #[must_use]
    pub fn price_handler_count(&self) -> usize {
        self.price_handlers.read().len()
    }

    /// Number of registered order book handlers.
    #[must_use]
    pub fn order_book_handler_count(&self) -> usize {
        self.order_book_handlers.read().len()
    }

    /// Deliver a record to every handler of its kind.
    pub fn dispatch(&self, record: &MarketRecord) -> DispatchReport {
        let kind = record.kind();
        metrics::record_dispatched(kind);

        let outcomes: Vec<Result<(), String>> = match record {
            MarketRecord::PriceTick(tick) => {
                let handlers = self.price_handlers.read().clone();
                handlers
                    .iter()
                    .map(|handler| invoke(|| handler.on_price_tick(tick)))
                    .collect()
            }
            MarketRecord::OrderBook(book) => {
                let handlers = self.order_book_handlers.read().clone();
                handlers
                    .iter()
                    .map(|handler| invoke(|| handler.on_order_book(book)))
                    .collect()
            }
        };

        let mut report = DispatchReport::default();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    report.failed += 1;
                    metrics::record_handler_failure(kind);
                    tracing::warn!(
                        record = kind,
                        symbol = %record.symbol(),
                        handler = index,
                        error = %reason,
                        "Handler failed"
                    );
                }
            }
        }
        report
    }
}

fn invoke(call: impl FnOnce() -> anyhow::Result<()>) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(format!("panicked: {message}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::streaming::{OrderBookSnapshot, PriceTick};

    fn tick(symbol: &str) -> MarketRecord {
        MarketRecord::PriceTick(PriceTick {
            symbol: symbol.to_string(),
            price: 71_500,
            change: 500,
            change_rate: Decimal::new(71, 2),
            volume: 12_345,
            timestamp: Utc::now(),
        })
    }

    fn book() -> MarketRecord {
        MarketRecord::OrderBook(OrderBookSnapshot {
            symbol: "005930".to_string(),
            ask_prices: [0; 10],
            ask_volumes: [0; 10],
            bid_prices: [0; 10],
            bid_volumes: [0; 10],
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let dispatcher = CallbackDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let seen = Arc::clone(&seen);
            dispatcher.register_price_handler(move |_: &PriceTick| -> anyhow::Result<()> {
                seen.lock().push(id);
                Ok(())
            });
        }

        let report = dispatcher.dispatch(&tick("005930"));
        assert_eq!(report, DispatchReport { delivered: 3, failed: 0 });
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let dispatcher = CallbackDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        dispatcher.register_price_handler(|_: &PriceTick| -> anyhow::Result<()> {
            anyhow::bail!("consumer down")
        });
        let sink = Arc::clone(&seen);
        dispatcher.register_price_handler(move |tick: &PriceTick| -> anyhow::Result<()> {
            sink.lock().push(tick.symbol.clone());
            Ok(())
        });

        let report = dispatcher.dispatch(&tick("005930"));
        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(*seen.lock(), vec!["005930".to_string()]);
    }

    #[test]
    fn panicking_handler_is_contained() {
        let dispatcher = CallbackDispatcher::new();
        let seen = Arc::new(Mutex::new(0));

        dispatcher.register_price_handler(|_: &PriceTick| -> anyhow::Result<()> {
            panic!("handler bug")
        });
        let sink = Arc::clone(&seen);
        dispatcher.register_price_handler(move |_: &PriceTick| -> anyhow::Result<()> {
            *sink.lock() += 1;
            Ok(())
        });

        let first = dispatcher.dispatch(&tick("005930"));
        let second = dispatcher.dispatch(&tick("000660"));

        assert_eq!(first.failed, 1);
        assert_eq!(second.failed, 1);
        assert_eq!(*seen.lock(), 2);
    }

    #[test]
    fn records_route_by_kind() {
        let dispatcher = CallbackDispatcher::new();
        let ticks = Arc::new(Mutex::new(0));
        let books = Arc::new(Mutex::new(0));

        let sink = Arc::clone(&ticks);
        dispatcher.register_price_handler(move |_: &PriceTick| -> anyhow::Result<()> {
            *sink.lock() += 1;
            Ok(())
        });
        let sink = Arc::clone(&books);
        dispatcher.register_order_book_handler(move |_: &OrderBookSnapshot| -> anyhow::Result<()> {
            *sink.lock() += 1;
            Ok(())
        });

        dispatcher.dispatch(&book());
        dispatcher.dispatch(&book());
        dispatcher.dispatch(&tick("005930"));

        assert_eq!(*ticks.lock(), 1);
        assert_eq!(*books.lock(), 2);
    }

    #[test]
    fn dispatch_without_handlers_reports_nothing() {
        let dispatcher = CallbackDispatcher::new();
        assert_eq!(dispatcher.dispatch(&tick("005930")), DispatchReport::default());
        assert_eq!(dispatcher.price_handler_count(), 0);
        assert_eq!(dispatcher.order_book_handler_count(), 0);
    }

    #[test]
    fn handler_may_register_during_dispatch() {
        let dispatcher = Arc::new(CallbackDispatcher::new());
        let inner = Arc::clone(&dispatcher);
        dispatcher.register_price_handler(move |_: &PriceTick| -> anyhow::Result<()> {
            inner.register_order_book_handler(|_: &OrderBookSnapshot| -> anyhow::Result<()> {
                Ok(())
            });
            Ok(())
        });

        dispatcher.dispatch(&tick("005930"));
        assert_eq!(dispatcher.order_book_handler_count(), 1);
    }
}

//! KIS Quote Stream Binary
//!
//! Fetches a REST snapshot for each configured symbol, then streams
//! real-time quotes until interrupted, logging every record.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kis-quote-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `KIS_APP_KEY`: KIS app key
//! - `KIS_APP_SECRET`: KIS app secret
//! - `KIS_ACCOUNT_NO`: Account number (`12345678-01`)
//!
//! ## Optional
//! - `KIS_IS_VIRTUAL`: Use the virtual (paper) environment (default: true)
//! - `KIS_SYMBOLS`: Comma-separated symbols (default: 005930)
//! - `KIS_TOKEN_CACHE_PATH`: Token cache file (default: token.json)
//! - `KIS_STREAM_ORDER_BOOK`: Also stream the order book (default: false)
//! - `KIS_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: `kis_quote_stream=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kis_quote_stream::infrastructure::health::{HealthServer, HealthServerState};
use kis_quote_stream::infrastructure::telemetry;
use kis_quote_stream::{
    CallbackDispatcher, Clock, KisConfig, OrderBookSnapshot, PriceTick, RestQuoteClient,
    StreamingClient, StreamingClientConfig, SystemClock, TokenCache, TokenStore,
    build_http_client, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("a rustls crypto provider is already installed"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting KIS quote stream");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = KisConfig::from_env()?;
    log_config(&config);

    let http = build_http_client(&config.http)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tokens = Arc::new(TokenStore::new(
        http.clone(),
        &config.http.base_url,
        config.credentials.clone(),
        TokenCache::new(&config.token_cache_path),
        clock,
    )?);

    let rest = RestQuoteClient::new(http, &config.http.base_url, Arc::clone(&tokens));
    log_snapshots(&rest, &config.symbols, config.stream.order_book).await?;

    let dispatcher = Arc::new(CallbackDispatcher::new());
    dispatcher.register_price_handler(|tick: &PriceTick| -> anyhow::Result<()> {
        tracing::info!(
            symbol = %tick.symbol,
            price = tick.price,
            change = tick.change,
            change_rate = %tick.change_rate,
            volume = tick.volume,
            "Price tick"
        );
        Ok(())
    });
    if config.stream.order_book {
        dispatcher.register_order_book_handler(|book: &OrderBookSnapshot| -> anyhow::Result<()> {
            tracing::info!(
                symbol = %book.symbol,
                best_ask = book.best_ask(),
                best_bid = book.best_bid(),
                spread = book.spread(),
                "Order book"
            );
            Ok(())
        });
    }

    let client = Arc::new(StreamingClient::new(
        StreamingClientConfig::from_settings(&config.stream),
        Arc::clone(&tokens),
        dispatcher,
    ));
    for symbol in &config.symbols {
        client.subscribe(symbol)?;
    }

    let shutdown_token = CancellationToken::new();

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&client),
        ));
        let health_server =
            HealthServer::new(config.server.health_port, health_state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let stream_client = Arc::clone(&client);
    let mut stream_task = tokio::spawn(async move { stream_client.run().await });

    tracing::info!(symbols = config.symbols.len(), "Quote stream ready");

    let finished = tokio::select! {
        () = await_shutdown() => None,
        result = &mut stream_task => Some(result),
    };

    client.close();
    shutdown_token.cancel();

    let result = match finished {
        Some(result) => result,
        None => match tokio::time::timeout(SHUTDOWN_TIMEOUT, stream_task).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "Streaming client did not stop in time"
                );
                return Ok(());
            }
        },
    };

    match result {
        Ok(Ok(())) => {
            tracing::info!("Quote stream stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Quote stream failed");
            Err(e.into())
        }
        Err(e) => Err(anyhow::anyhow!("streaming task panicked: {e}")),
    }
}

/// Log one REST snapshot per symbol before streaming starts.
async fn log_snapshots(
    rest: &RestQuoteClient,
    symbols: &[String],
    order_book: bool,
) -> anyhow::Result<()> {
    for symbol in symbols {
        match rest.get_current_price(symbol).await? {
            Some(snapshot) => tracing::info!(
                symbol = %snapshot.symbol,
                price = snapshot.price,
                open = snapshot.open,
                high = snapshot.high,
                low = snapshot.low,
                volume = snapshot.volume,
                "Current price"
            ),
            None => tracing::warn!(symbol = %symbol, "No current price available"),
        }

        if order_book && let Some(book) = rest.get_orderbook(symbol).await? {
            tracing::info!(
                symbol = %book.symbol,
                best_ask = book.best_ask(),
                best_bid = book.best_bid(),
                ask_volume = book.total_ask_volume(),
                bid_volume = book.total_bid_volume(),
                "Order book snapshot"
            );
        }
    }
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &KisConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        account = ?config.account,
        symbols = ?config.symbols,
        order_book = config.stream.order_book,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        rest_base_url = %config.http.base_url,
        ws_url = %config.stream.url,
        token_cache = %config.token_cache_path.display(),
        "KIS endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

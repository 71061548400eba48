//! REST Quote Client
//!
//! On-demand snapshots from the KIS domestic stock quotation endpoints.
//!
//! Only credential failures are surfaced to the caller. Transport errors,
//! non-zero business codes, and malformed payloads are logged, counted, and
//! reported as `Ok(None)` so a polling caller can simply try again later.

use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use thiserror::Error;

use super::auth::{AuthError, TokenStore};
use super::messages::{
    CUSTOMER_TYPE_PERSONAL, QuoteResponse, TR_INQUIRE_ORDER_BOOK, TR_INQUIRE_PRICE,
};
use crate::application::ports::Clock;
use crate::domain::streaming::{ORDER_BOOK_DEPTH, OrderBookSnapshot, PriceSnapshot};
use crate::infrastructure::config::HttpSettings;
use crate::infrastructure::metrics::{self, RestEndpoint};

const CURRENT_PRICE_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-price";
const ORDER_BOOK_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-asking-price-exp-ccn";
const MARKET_DIVISION_STOCK: &str = "J";

/// Why a quote request produced no snapshot.
#[derive(Debug, Error)]
enum QuoteError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("network error: {0}")]
    Network(String),

    #[error("business error {code}: {message}")]
    Business { code: String, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

impl QuoteError {
    const fn outcome(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth_error",
            Self::Network(_) => "network_error",
            Self::Business { .. } => "business_error",
            Self::Parse(_) => "parse_error",
        }
    }
}

/// Signed REST client for quote snapshots.
#[derive(Debug, Clone)]
pub struct RestQuoteClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    clock: Arc<dyn Clock>,
}

impl RestQuoteClient {
    /// Create a client sharing `tokens` for authorization.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<TokenStore>,
    ) -> Self {
        let clock = tokens.clock();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            clock,
        }
    }

    /// Create a client from HTTP settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(
        settings: &HttpSettings,
        tokens: Arc<TokenStore>,
    ) -> Result<Self, reqwest::Error> {
        let http = super::build_http_client(settings)?;
        Ok(Self::new(http, &settings.base_url, tokens))
    }

    /// Current price snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error only if an access token cannot be obtained.
    pub async fn get_current_price(
        &self,
        symbol: &str,
    ) -> Result<Option<PriceSnapshot>, AuthError> {
        let started = Instant::now();
        let result = self
            .inquire(CURRENT_PRICE_PATH, TR_INQUIRE_PRICE, symbol)
            .await
            .and_then(|response| self.parse_price(symbol, response));
        settle(RestEndpoint::CurrentPrice, symbol, started, result)
    }

    /// Ten-level order book snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error only if an access token cannot be obtained.
    pub async fn get_orderbook(
        &self,
        symbol: &str,
    ) -> Result<Option<OrderBookSnapshot>, AuthError> {
        let started = Instant::now();
        let result = self
            .inquire(ORDER_BOOK_PATH, TR_INQUIRE_ORDER_BOOK, symbol)
            .await
            .and_then(|response| self.parse_order_book(symbol, response));
        settle(RestEndpoint::OrderBook, symbol, started, result)
    }

    async fn inquire(
        &self,
        path: &str,
        tr_id: &str,
        symbol: &str,
    ) -> Result<QuoteResponse, QuoteError> {
        let token = self.tokens.get_access_token().await?;
        let credentials = self.tokens.credentials();

        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .header("content-type", "application/json; charset=utf-8")
            .header("authorization", format!("Bearer {}", token.as_str()))
            .header("appkey", credentials.app_key())
            .header("appsecret", credentials.app_secret())
            .header("tr_id", tr_id)
            .header("custtype", CUSTOMER_TYPE_PERSONAL)
            .query(&[
                ("fid_cond_mrkt_div_code", MARKET_DIVISION_STOCK),
                ("fid_input_iscd", symbol),
            ])
            .send()
            .await
            .map_err(|e| QuoteError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| QuoteError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(QuoteError::Network(format!("HTTP {}: {text}", status.as_u16())));
        }

        let body: QuoteResponse =
            serde_json::from_str(&text).map_err(|e| QuoteError::Parse(e.to_string()))?;
        if !body.is_success() {
            return Err(QuoteError::Business {
                code: body.msg_cd,
                message: body.msg1,
            });
        }
        Ok(body)
    }

    fn parse_price(
        &self,
        symbol: &str,
        response: QuoteResponse,
    ) -> Result<PriceSnapshot, QuoteError> {
        let output = response
            .output
            .ok_or_else(|| QuoteError::Parse("missing output".to_string()))?;

        Ok(PriceSnapshot {
            symbol: symbol.to_string(),
            price: field(&output, "stck_prpr")?,
            change: field(&output, "prdy_vrss")?,
            change_rate: field::<Decimal>(&output, "prdy_ctrt")?,
            volume: field(&output, "acml_vol")?,
            open: field(&output, "stck_oprc")?,
            high: field(&output, "stck_hgpr")?,
            low: field(&output, "stck_lwpr")?,
            timestamp: self.clock.now(),
        })
    }

    fn parse_order_book(
        &self,
        symbol: &str,
        response: QuoteResponse,
    ) -> Result<OrderBookSnapshot, QuoteError> {
        let output = response
            .output1
            .ok_or_else(|| QuoteError::Parse("missing output1".to_string()))?;

        Ok(OrderBookSnapshot {
            symbol: symbol.to_string(),
            ask_prices: levels(&output, "askp")?,
            ask_volumes: levels(&output, "askp_rsqn")?,
            bid_prices: levels(&output, "bidp")?,
            bid_volumes: levels(&output, "bidp_rsqn")?,
            timestamp: self.clock.now(),
        })
    }
}

fn settle<T>(
    endpoint: RestEndpoint,
    symbol: &str,
    started: Instant,
    result: Result<T, QuoteError>,
) -> Result<Option<T>, AuthError> {
    let elapsed = started.elapsed();
    match result {
        Ok(snapshot) => {
            metrics::record_rest_request(endpoint, "ok", elapsed);
            Ok(Some(snapshot))
        }
        Err(QuoteError::Auth(e)) => {
            metrics::record_rest_request(endpoint, "auth_error", elapsed);
            Err(e)
        }
        Err(e) => {
            metrics::record_rest_request(endpoint, e.outcome(), elapsed);
            tracing::warn!(symbol, error = %e, "Quote request failed");
            Ok(None)
        }
    }
}

fn field<T: std::str::FromStr>(output: &Map<String, Value>, name: &str) -> Result<T, QuoteError> {
    let raw = match output.get(name) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => return Err(QuoteError::Parse(format!("{name}: unexpected {other}"))),
        None => return Err(QuoteError::Parse(format!("missing {name}"))),
    };
    raw.parse()
        .map_err(|_| QuoteError::Parse(format!("{name}: invalid value {raw:?}")))
}

fn levels<T>(
    output: &Map<String, Value>,
    prefix: &str,
) -> Result<[T; ORDER_BOOK_DEPTH], QuoteError>
where
    T: std::str::FromStr + Default + Copy,
{
    let mut values = [T::default(); ORDER_BOOK_DEPTH];
    for (i, value) in values.iter_mut().enumerate() {
        *value = field(output, &format!("{prefix}{}", i + 1))?;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn field_accepts_strings_and_numbers() {
        let output = map(json!({"a": " 70000 ", "b": 12, "c": "0.71"}));
        assert_eq!(field::<i64>(&output, "a").unwrap(), 70_000);
        assert_eq!(field::<u64>(&output, "b").unwrap(), 12);
        assert_eq!(field::<Decimal>(&output, "c").unwrap(), Decimal::new(71, 2));
    }

    #[test]
    fn field_reports_missing_and_invalid() {
        let output = map(json!({"a": "x", "b": null}));
        assert!(matches!(field::<i64>(&output, "a"), Err(QuoteError::Parse(_))));
        assert!(matches!(field::<i64>(&output, "b"), Err(QuoteError::Parse(_))));
        assert!(matches!(field::<i64>(&output, "c"), Err(QuoteError::Parse(_))));
    }

    #[test]
    fn levels_reads_one_based_fields() {
        let mut output = Map::new();
        for i in 1..=10 {
            output.insert(format!("askp{i}"), json!((70_000 + i * 100).to_string()));
        }
        let parsed: [i64; ORDER_BOOK_DEPTH] = levels(&output, "askp").unwrap();
        assert_eq!(parsed[0], 70_100);
        assert_eq!(parsed[9], 71_000);

        output.remove("askp7");
        assert!(levels::<i64>(&output, "askp").is_err());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(QuoteError::Network(String::new()).outcome(), "network_error");
        assert_eq!(QuoteError::Parse(String::new()).outcome(), "parse_error");
        assert_eq!(
            QuoteError::Business {
                code: String::new(),
                message: String::new()
            }
            .outcome(),
            "business_error"
        );
    }
}

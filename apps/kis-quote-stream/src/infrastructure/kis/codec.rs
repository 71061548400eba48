//! Stream Codec Module
//!
//! Decodes raw WebSocket text into typed frames.
//!
//! # Wire Format
//!
//! Real-time data frames are plain text starting with an encryption flag:
//!
//! ```text
//! 0|H0STCNT0|1|005930^093015^70000^500^0.71^...
//! │ │        │ └── body: item_count rows of '^'-separated fields
//! │ │        └──── item_count
//! │ └───────────── tr_id
//! └─────────────── flag ('0' plain, '1' encrypted)
//! ```
//!
//! Everything else is a JSON control message (subscription acks and the
//! `PINGPONG` keepalive).
//!
//! # Row Layouts
//!
//! | Stream     | Fields used                                          | Min width |
//! |------------|------------------------------------------------------|-----------|
//! | `H0STCNT0` | symbol 0, price 2, change 3, rate 4, volume 13 (12)  | 13        |
//! | `H0STASP0` | symbol 0, asks 3..=12, bids 13..=22, ask qty 23..=32, bid qty 33..=42 | 43 |

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::messages::{ControlMessage, SubscribeRequest, TR_ORDER_BOOK, TR_PRICE_TICK};
use crate::domain::streaming::{MarketRecord, ORDER_BOOK_DEPTH, OrderBookSnapshot, PriceTick};

const PRICE_SYMBOL: usize = 0;
const PRICE_LAST: usize = 2;
const PRICE_CHANGE: usize = 3;
const PRICE_CHANGE_RATE: usize = 4;
const PRICE_VOLUME: usize = 13;
const PRICE_VOLUME_SHORT_ROW: usize = 12;
const PRICE_MIN_FIELDS: usize = 13;

const BOOK_SYMBOL: usize = 0;
const BOOK_ASK_PRICES: usize = 3;
const BOOK_BID_PRICES: usize = BOOK_ASK_PRICES + ORDER_BOOK_DEPTH;
const BOOK_ASK_VOLUMES: usize = BOOK_BID_PRICES + ORDER_BOOK_DEPTH;
const BOOK_BID_VOLUMES: usize = BOOK_ASK_VOLUMES + ORDER_BOOK_DEPTH;
const BOOK_MIN_FIELDS: usize = BOOK_BID_VOLUMES + ORDER_BOOK_DEPTH;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame was empty or whitespace.
    #[error("empty frame")]
    Empty,

    /// Data frame had fewer than four `|` segments.
    #[error("truncated data frame: expected 4 segments, got {segments}")]
    Truncated {
        /// Segments present.
        segments: usize,
    },

    /// Item count was not a positive integer.
    #[error("invalid item count: {0:?}")]
    InvalidItemCount(String),

    /// Field count was not a multiple of the item count.
    #[error("{fields} fields cannot be split into {rows} rows")]
    RowMisaligned {
        /// Fields in the body.
        fields: usize,
        /// Declared row count.
        rows: usize,
    },

    /// A row was narrower than its layout requires.
    #[error("{tr_id} row has {found} fields, expected at least {expected}")]
    TooFewFields {
        /// Stream transaction id.
        tr_id: &'static str,
        /// Minimum width.
        expected: usize,
        /// Actual width.
        found: usize,
    },

    /// A field failed to parse.
    #[error("invalid {field} at index {index}: {value:?}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Position within the row.
        index: usize,
        /// Raw value.
        value: String,
    },

    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Frame {
    /// One or more market records.
    Records(Vec<MarketRecord>),
    /// Server keepalive. Never dispatched.
    Heartbeat,
    /// Subscription acknowledgment or other control message.
    Control(ControlMessage),
    /// Data frame for a stream this client does not decode.
    Unknown {
        /// Transaction id of the frame.
        tr_id: String,
    },
}

/// KIS WebSocket codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl MessageCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text frame.
    ///
    /// `received_at` becomes the timestamp of every decoded record.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is truncated, a row is too narrow, a
    /// numeric field does not parse, or a control message is not JSON.
    pub fn decode(&self, raw: &str, received_at: DateTime<Utc>) -> Result<Frame, CodecError> {
        let raw = raw.trim();
        match raw.as_bytes().first() {
            None => Err(CodecError::Empty),
            Some(b'0' | b'1') => Self::decode_data(raw, received_at),
            Some(_) => Self::decode_control(raw),
        }
    }

    /// Encode a subscribe/unsubscribe request as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_subscribe(&self, request: &SubscribeRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }

    fn decode_data(raw: &str, received_at: DateTime<Utc>) -> Result<Frame, CodecError> {
        let segments: Vec<&str> = raw.splitn(4, '|').collect();
        let [_flag, tr_id, item_count, body] = segments[..] else {
            return Err(CodecError::Truncated {
                segments: segments.len(),
            });
        };

        let (tr_id, min_fields) = match tr_id {
            TR_PRICE_TICK => (TR_PRICE_TICK, PRICE_MIN_FIELDS),
            TR_ORDER_BOOK => (TR_ORDER_BOOK, BOOK_MIN_FIELDS),
            other => {
                return Ok(Frame::Unknown {
                    tr_id: other.to_string(),
                });
            }
        };

        let rows = item_count
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| CodecError::InvalidItemCount(item_count.to_string()))?;

        let fields: Vec<&str> = body.split('^').collect();
        if fields.len() % rows != 0 {
            return Err(CodecError::RowMisaligned {
                fields: fields.len(),
                rows,
            });
        }
        let width = fields.len() / rows;
        if width < min_fields {
            return Err(CodecError::TooFewFields {
                tr_id,
                expected: min_fields,
                found: width,
            });
        }

        let records = fields
            .chunks_exact(width)
            .map(|row| {
                if tr_id == TR_PRICE_TICK {
                    decode_price_row(row, received_at).map(MarketRecord::PriceTick)
                } else {
                    decode_book_row(row, received_at).map(MarketRecord::OrderBook)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Frame::Records(records))
    }

    fn decode_control(raw: &str) -> Result<Frame, CodecError> {
        let message: ControlMessage = serde_json::from_str(raw)?;
        if message.is_heartbeat() {
            Ok(Frame::Heartbeat)
        } else {
            Ok(Frame::Control(message))
        }
    }
}

fn decode_price_row(row: &[&str], received_at: DateTime<Utc>) -> Result<PriceTick, CodecError> {
    let volume_index = if row.len() > PRICE_VOLUME {
        PRICE_VOLUME
    } else {
        PRICE_VOLUME_SHORT_ROW
    };

    Ok(PriceTick {
        symbol: symbol_field(row, PRICE_SYMBOL)?,
        price: parse_field(row, PRICE_LAST, "price")?,
        change: parse_field(row, PRICE_CHANGE, "change")?,
        change_rate: parse_field::<Decimal>(row, PRICE_CHANGE_RATE, "change_rate")?,
        volume: parse_field(row, volume_index, "volume")?,
        timestamp: received_at,
    })
}

fn decode_book_row(
    row: &[&str],
    received_at: DateTime<Utc>,
) -> Result<OrderBookSnapshot, CodecError> {
    Ok(OrderBookSnapshot {
        symbol: symbol_field(row, BOOK_SYMBOL)?,
        ask_prices: parse_levels(row, BOOK_ASK_PRICES, "ask_price")?,
        ask_volumes: parse_levels(row, BOOK_ASK_VOLUMES, "ask_volume")?,
        bid_prices: parse_levels(row, BOOK_BID_PRICES, "bid_price")?,
        bid_volumes: parse_levels(row, BOOK_BID_VOLUMES, "bid_volume")?,
        timestamp: received_at,
    })
}

fn symbol_field(row: &[&str], index: usize) -> Result<String, CodecError> {
    let symbol = row.get(index).map_or("", |s| s.trim());
    if symbol.is_empty() {
        return Err(CodecError::InvalidField {
            field: "symbol",
            index,
            value: String::new(),
        });
    }
    Ok(symbol.to_string())
}

fn parse_field<T: std::str::FromStr>(
    row: &[&str],
    index: usize,
    field: &'static str,
) -> Result<T, CodecError> {
    let raw = row.get(index).copied().unwrap_or_default();
    raw.trim().parse().map_err(|_| CodecError::InvalidField {
        field,
        index,
        value: raw.to_string(),
    })
}

fn parse_levels<T>(
    row: &[&str],
    start: usize,
    field: &'static str,
) -> Result<[T; ORDER_BOOK_DEPTH], CodecError>
where
    T: std::str::FromStr + Default + Copy,
{
    let mut levels = [T::default(); ORDER_BOOK_DEPTH];
    for (offset, level) in levels.iter_mut().enumerate() {
        *level = parse_field(row, start + offset, field)?;
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;
    use crate::infrastructure::kis::messages::{CUSTOMER_TYPE_PERSONAL, TrType};

    const CANONICAL: &str = "0|H0STCNT0|1|005930^0^70000^500^0.71^x^x^x^x^x^x^x^1000000";

    fn decode(raw: &str) -> Result<Frame, CodecError> {
        MessageCodec::new().decode(raw, Utc::now())
    }

    fn records(raw: &str) -> Vec<MarketRecord> {
        match decode(raw).unwrap() {
            Frame::Records(records) => records,
            other => panic!("expected records, got {other:?}"),
        }
    }

    fn price_row(symbol: &str, price: i64, volume: u64) -> String {
        let mut fields = vec![
            symbol.to_string(),
            "093015".to_string(),
            price.to_string(),
            "-300".to_string(),
            "-0.42".to_string(),
        ];
        fields.extend((5..13).map(|i| format!("f{i}")));
        fields.push(volume.to_string());
        fields.push("tail".to_string());
        fields.join("^")
    }

    fn book_row(symbol: &str) -> String {
        let mut fields = vec![symbol.to_string(), "093015".to_string(), "0".to_string()];
        fields.extend((0..10).map(|i| (70_100 + i * 100).to_string()));
        fields.extend((0..10).map(|i| (70_000 - i * 100).to_string()));
        fields.extend((1..=10).map(|i| (i * 10).to_string()));
        fields.extend((1..=10).map(|i| i.to_string()));
        fields.push("extra".to_string());
        fields.join("^")
    }

    #[test]
    fn decodes_canonical_price_frame() {
        let decoded = records(CANONICAL);
        assert_eq!(decoded.len(), 1);

        let MarketRecord::PriceTick(tick) = &decoded[0] else {
            panic!("expected price tick");
        };
        assert_eq!(tick.symbol, "005930");
        assert_eq!(tick.price, 70_000);
        assert_eq!(tick.change, 500);
        assert_eq!(tick.change_rate, Decimal::from_str("0.71").unwrap());
        assert_eq!(tick.volume, 1_000_000);
    }

    #[test]
    fn full_width_row_reads_volume_at_thirteen() {
        let raw = format!("0|H0STCNT0|1|{}", price_row("000660", 130_500, 42));
        let decoded = records(&raw);

        let MarketRecord::PriceTick(tick) = &decoded[0] else {
            panic!("expected price tick");
        };
        assert_eq!(tick.price, 130_500);
        assert_eq!(tick.change, -300);
        assert_eq!(tick.change_rate, Decimal::from_str("-0.42").unwrap());
        assert_eq!(tick.volume, 42);
    }

    #[test]
    fn every_row_of_multi_row_frame_is_decoded() {
        let raw = format!(
            "0|H0STCNT0|3|{}^{}^{}",
            price_row("005930", 70_000, 1),
            price_row("005930", 70_100, 2),
            price_row("005930", 70_200, 3)
        );
        let decoded = records(&raw);

        let prices: Vec<i64> = decoded
            .iter()
            .map(|r| match r {
                MarketRecord::PriceTick(t) => t.price,
                MarketRecord::OrderBook(_) => panic!("unexpected book"),
            })
            .collect();
        assert_eq!(prices, vec![70_000, 70_100, 70_200]);
    }

    #[test]
    fn decodes_order_book_frame() {
        let raw = format!("0|H0STASP0|1|{}", book_row("005930"));
        let decoded = records(&raw);

        let MarketRecord::OrderBook(book) = &decoded[0] else {
            panic!("expected order book");
        };
        assert_eq!(book.symbol, "005930");
        assert_eq!(book.best_ask(), 70_100);
        assert_eq!(book.best_bid(), 70_000);
        assert_eq!(book.ask_prices[9], 71_000);
        assert_eq!(book.bid_prices[9], 69_100);
        assert_eq!(book.ask_volumes[0], 10);
        assert_eq!(book.bid_volumes[9], 10);
    }

    #[test]
    fn records_carry_receive_time() {
        let at = Utc::now();
        let Frame::Records(decoded) = MessageCodec::new().decode(CANONICAL, at).unwrap() else {
            panic!("expected records");
        };
        let MarketRecord::PriceTick(tick) = &decoded[0] else {
            panic!("expected price tick");
        };
        assert_eq!(tick.timestamp, at);
    }

    #[test]
    fn pingpong_is_heartbeat() {
        let frame = decode(r#"{"header":{"tr_id":"PINGPONG","datetime":"20240102090000"}}"#);
        assert!(matches!(frame, Ok(Frame::Heartbeat)));
    }

    #[test]
    fn subscription_ack_is_control() {
        let frame = decode(
            r#"{"header":{"tr_id":"H0STCNT0","tr_key":"005930","encrypt":"N"},"body":{"rt_cd":"0","msg_cd":"OPSP0000","msg1":"SUBSCRIBE SUCCESS"}}"#,
        )
        .unwrap();
        let Frame::Control(message) = frame else {
            panic!("expected control");
        };
        assert_eq!(message.header.tr_key.as_deref(), Some("005930"));
        assert!(!message.is_error());
    }

    #[test]
    fn unknown_stream_is_reported_not_decoded() {
        let frame = decode("0|H0STCNI0|1|a^b^c").unwrap();
        assert!(matches!(frame, Frame::Unknown { ref tr_id } if tr_id == "H0STCNI0"));
    }

    #[test_case("0|H0STCNT0|1", 3 ; "missing body")]
    #[test_case("0|H0STCNT0", 2 ; "missing count")]
    #[test_case("1", 1 ; "flag only")]
    fn truncated_frames_are_rejected(raw: &str, segments: usize) {
        let err = decode(raw).unwrap_err();
        assert!(
            matches!(err, CodecError::Truncated { segments: s } if s == segments),
            "got {err:?}"
        );
    }

    #[test_case("0|H0STCNT0|0|a^b" ; "zero rows")]
    #[test_case("0|H0STCNT0|x|a^b" ; "non numeric")]
    fn invalid_item_counts_are_rejected(raw: &str) {
        assert!(matches!(decode(raw), Err(CodecError::InvalidItemCount(_))));
    }

    #[test]
    fn misaligned_rows_are_rejected() {
        let raw = format!("0|H0STCNT0|2|{}^extra^more", price_row("005930", 1, 1));
        assert!(matches!(decode(&raw), Err(CodecError::RowMisaligned { .. })));
    }

    #[test]
    fn narrow_row_is_rejected() {
        let err = decode("0|H0STCNT0|1|005930^0^70000").unwrap_err();
        assert!(matches!(
            err,
            CodecError::TooFewFields {
                tr_id: "H0STCNT0",
                expected: 13,
                found: 3
            }
        ));
    }

    #[test]
    fn non_numeric_price_names_the_field() {
        let err = decode("0|H0STCNT0|1|005930^0^abc^500^0.71^x^x^x^x^x^x^x^1").unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidField {
                field: "price",
                index: 2,
                ..
            }
        ));
    }

    #[test]
    fn non_json_control_is_rejected() {
        assert!(matches!(decode("hello"), Err(CodecError::Json(_))));
        assert!(matches!(decode("   "), Err(CodecError::Empty)));
    }

    #[test]
    fn encodes_subscribe_request() {
        let request = SubscribeRequest::new(
            "key",
            CUSTOMER_TYPE_PERSONAL,
            TrType::Register,
            TR_PRICE_TICK,
            "005930",
        );
        let text = MessageCodec::new().encode_subscribe(&request).unwrap();
        assert!(text.contains(r#""tr_key":"005930""#));
        assert!(text.contains(r#""content-type":"utf-8""#));
    }

    proptest! {
        #[test]
        fn decode_never_panics(raw in ".{0,256}") {
            let _ = MessageCodec::new().decode(&raw, Utc::now());
        }

        #[test]
        fn decode_never_panics_on_data_shaped_input(
            count in "[0-9]{0,3}",
            body in "[0-9a-z.^-]{0,128}",
        ) {
            let raw = format!("0|H0STCNT0|{count}|{body}");
            let _ = MessageCodec::new().decode(&raw, Utc::now());
        }
    }
}

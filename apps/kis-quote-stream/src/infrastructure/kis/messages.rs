//! KIS Open API Message Types
//!
//! Serde types for the OAuth endpoints, the REST quote responses, and the
//! JSON side of the WebSocket protocol (subscribe requests and control
//! acknowledgments). Real-time data frames are pipe-delimited text and are
//! handled by the codec, not here.
//!
//! # References
//!
//! - [KIS Developers](https://apiportal.koreainvestment.com/apiservice)

use serde::{Deserialize, Serialize};

// =============================================================================
// Transaction IDs
// =============================================================================

/// Real-time domestic stock trade print stream.
pub const TR_PRICE_TICK: &str = "H0STCNT0";

/// Real-time domestic stock order book stream.
pub const TR_ORDER_BOOK: &str = "H0STASP0";

/// Server keepalive control message.
pub const TR_HEARTBEAT: &str = "PINGPONG";

/// REST current price inquiry.
pub const TR_INQUIRE_PRICE: &str = "FHKST01010100";

/// REST order book inquiry.
pub const TR_INQUIRE_ORDER_BOOK: &str = "FHKST01010200";

/// Customer type for individual accounts.
pub const CUSTOMER_TYPE_PERSONAL: &str = "P";

// =============================================================================
// OAuth
// =============================================================================

/// Access token request (`POST /oauth2/tokenP`).
#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest<'a> {
    /// Always `client_credentials`.
    pub grant_type: &'a str,
    /// App key.
    pub appkey: &'a str,
    /// App secret.
    pub appsecret: &'a str,
}

/// Access token response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer token.
    pub access_token: String,
    /// Declared expiry, `YYYY-MM-DD HH:MM:SS` in KST.
    #[serde(default)]
    pub access_token_token_expired: Option<String>,
    /// Token type (`Bearer`).
    #[serde(default)]
    pub token_type: Option<String>,
    /// Declared lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Approval key request (`POST /oauth2/Approval`).
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest<'a> {
    /// Always `client_credentials`.
    pub grant_type: &'a str,
    /// App key.
    pub appkey: &'a str,
    /// App secret, under the name this endpoint expects.
    pub secretkey: &'a str,
}

/// Approval key response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalResponse {
    /// WebSocket approval key.
    pub approval_key: String,
}

// =============================================================================
// REST Quotes
// =============================================================================

/// Envelope shared by the quotation endpoints.
///
/// Quote values arrive as strings; they stay untyped here and are parsed
/// field by field so one bad value can be reported by name.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteResponse {
    /// Result code, `"0"` on success.
    pub rt_cd: String,
    /// Message code.
    #[serde(default)]
    pub msg_cd: String,
    /// Human-readable message.
    #[serde(default)]
    pub msg1: String,
    /// Current price payload.
    #[serde(default)]
    pub output: Option<serde_json::Map<String, serde_json::Value>>,
    /// Order book payload.
    #[serde(default)]
    pub output1: Option<serde_json::Map<String, serde_json::Value>>,
}

impl QuoteResponse {
    /// Check the result code.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.rt_cd == "0"
    }
}

// =============================================================================
// WebSocket Requests
// =============================================================================

/// Subscription action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrType {
    /// Start streaming a key.
    #[serde(rename = "1")]
    Register,
    /// Stop streaming a key.
    #[serde(rename = "2")]
    Unregister,
}

/// Subscribe/unsubscribe request frame.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    /// Session header.
    pub header: SubscribeHeader,
    /// Target stream.
    pub body: SubscribeBody,
}

/// Subscribe request header.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeHeader {
    /// WebSocket approval key.
    pub approval_key: String,
    /// Customer type.
    pub custtype: String,
    /// Register or unregister.
    pub tr_type: TrType,
    /// Payload encoding.
    #[serde(rename = "content-type")]
    pub content_type: String,
}

/// Subscribe request body.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeBody {
    /// Stream selector.
    pub input: SubscribeInput,
}

/// Stream selector.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeInput {
    /// Stream transaction id.
    pub tr_id: String,
    /// Symbol.
    pub tr_key: String,
}

impl SubscribeRequest {
    /// Build a request for one stream and symbol.
    #[must_use]
    pub fn new(
        approval_key: &str,
        customer_type: &str,
        tr_type: TrType,
        tr_id: &str,
        symbol: &str,
    ) -> Self {
        Self {
            header: SubscribeHeader {
                approval_key: approval_key.to_string(),
                custtype: customer_type.to_string(),
                tr_type,
                content_type: "utf-8".to_string(),
            },
            body: SubscribeBody {
                input: SubscribeInput {
                    tr_id: tr_id.to_string(),
                    tr_key: symbol.to_string(),
                },
            },
        }
    }
}

// =============================================================================
// WebSocket Control Messages
// =============================================================================

/// JSON control message (subscription acknowledgment or keepalive).
#[derive(Debug, Clone, Deserialize)]
pub struct ControlMessage {
    /// Routing header.
    pub header: ControlHeader,
    /// Result body. Absent on keepalives.
    #[serde(default)]
    pub body: Option<ControlBody>,
}

/// Control message header.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlHeader {
    /// Transaction id the message refers to.
    pub tr_id: String,
    /// Symbol the message refers to.
    #[serde(default)]
    pub tr_key: Option<String>,
    /// Whether data frames for this subscription are encrypted.
    #[serde(default)]
    pub encrypt: Option<String>,
    /// Server timestamp (`YYYYMMDDHHMMSS`).
    #[serde(default)]
    pub datetime: Option<String>,
}

/// Control message result.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlBody {
    /// Result code, `"0"` on success.
    pub rt_cd: String,
    /// Message code.
    #[serde(default)]
    pub msg_cd: String,
    /// Human-readable message.
    #[serde(default)]
    pub msg1: String,
}

impl ControlMessage {
    /// Check if this is a keepalive.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.header.tr_id == TR_HEARTBEAT
    }

    /// Check if the server reported a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.body.as_ref().is_some_and(|b| b.rt_cd != "0")
    }
}

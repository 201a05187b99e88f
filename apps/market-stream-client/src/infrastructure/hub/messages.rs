//! Hub Protocol Message Types
//!
//! Wire types for the JSON hub protocol spoken by the market data hub.
//! Every frame is a JSON object terminated by the record separator `0x1E`.
//!
//! # Frame Types
//!
//! | `type` | Frame |
//! |--------|-------|
//! | 1 | Invocation (both directions) |
//! | 3 | Completion |
//! | 6 | Ping |
//! | 7 | Close |

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminates every frame.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Protocol name sent in the handshake.
pub const PROTOCOL: &str = "json";

/// Protocol version sent in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frame type discriminators.
pub mod frame_type {
    /// Invocation of a hub method or client handler.
    pub const INVOCATION: u64 = 1;
    /// Result of an invocation.
    pub const COMPLETION: u64 = 3;
    /// Keep-alive.
    pub const PING: u64 = 6;
    /// Connection close.
    pub const CLOSE: u64 = 7;
}

/// Invocation targets.
pub mod target {
    /// Client → hub: join a symbol's market group.
    pub const JOIN_MARKET_GROUP: &str = "JoinMarketGroup";
    /// Client → hub: leave a symbol's market group.
    pub const LEAVE_MARKET_GROUP: &str = "LeaveMarketGroup";
    /// Client → hub: ask for the current price.
    pub const REQUEST_CURRENT_PRICE: &str = "RequestCurrentPrice";
    /// Client → hub: ask for price history.
    pub const GET_PRICE_HISTORY: &str = "GetPriceHistory";

    /// Hub → client: price tick.
    pub const PRICE_UPDATE: &str = "PriceUpdate";
    /// Hub → client: batched market update.
    pub const MARKET_UPDATE: &str = "MarketUpdate";
    /// Hub → client: current-price reply.
    pub const CURRENT_PRICE: &str = "CurrentPrice";
    /// Hub → client: price-history reply.
    pub const PRICE_HISTORY: &str = "PriceHistory";
    /// Hub → client: executed trade.
    pub const TRADE_MESSAGE: &str = "TradeMessage";
}

// =============================================================================
// Handshake
// =============================================================================

/// Handshake request sent right after the socket opens.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeRequest {
    /// Protocol name.
    pub protocol: &'static str,
    /// Protocol version.
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL,
            version: PROTOCOL_VERSION,
        }
    }
}

/// Handshake response; an empty object means success.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeResponse {
    /// Rejection reason.
    #[serde(default)]
    pub error: Option<String>,
}

// =============================================================================
// Frames
// =============================================================================

/// Invocation frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMessage {
    /// Always [`frame_type::INVOCATION`].
    #[serde(rename = "type")]
    pub msg_type: u64,
    /// Present when the caller expects a completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    /// Method or handler name.
    pub target: String,
    /// Positional arguments.
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl InvocationMessage {
    /// Create an invocation.
    #[must_use]
    pub fn new(target: &str, arguments: Vec<Value>, invocation_id: Option<String>) -> Self {
        Self {
            msg_type: frame_type::INVOCATION,
            invocation_id,
            target: target.to_string(),
            arguments,
        }
    }
}

/// Completion frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    /// Always [`frame_type::COMPLETION`].
    #[serde(rename = "type")]
    pub msg_type: u64,
    /// Invocation being completed.
    pub invocation_id: String,
    /// Return value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Close frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseMessage {
    /// Always [`frame_type::CLOSE`].
    #[serde(rename = "type")]
    pub msg_type: u64,
    /// Reason the server closed the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the server allows reconnecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_reconnect: Option<bool>,
}

impl CloseMessage {
    /// Close frame without error.
    #[must_use]
    pub const fn normal() -> Self {
        Self {
            msg_type: frame_type::CLOSE,
            error: None,
            allow_reconnect: None,
        }
    }
}

/// Ping frame.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PingMessage {
    /// Always [`frame_type::PING`].
    #[serde(rename = "type")]
    pub msg_type: u64,
}

impl Default for PingMessage {
    fn default() -> Self {
        Self {
            msg_type: frame_type::PING,
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    /// Invocation.
    Invocation(InvocationMessage),
    /// Completion.
    Completion(CompletionMessage),
    /// Keep-alive.
    Ping,
    /// Close.
    Close(CloseMessage),
    /// Any other frame type; ignored by the client.
    Other(u64),
}

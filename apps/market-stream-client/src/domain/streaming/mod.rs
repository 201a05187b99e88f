//! Market Data Streaming Types
//!
//! Core domain types for market data pushed by the trading backend:
//! price ticks, batched market updates with executed trades, current-price
//! snapshots and price history. These types are transport-agnostic and
//! represent the canonical internal representation of market data.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod timestamp;

/// A symbol string (stock ticker).
pub type Symbol = String;

// =============================================================================
// Securities
// =============================================================================

/// A tradable security as listed by the securities directory.
///
/// Immutable snapshot; fresher values arrive through push events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    /// Directory identifier.
    pub id: i64,
    /// Unique ticker.
    pub symbol: Symbol,
    /// Company display name.
    pub company_name: String,
    /// Last traded price.
    pub current_price: Decimal,
    /// Previous reference price.
    pub previous_price: Decimal,
    /// Traded volume.
    pub volume: i64,
    /// Time of the last directory update.
    #[serde(with = "timestamp")]
    pub last_updated: DateTime<Utc>,
    /// Whether the security is currently tradable.
    pub is_active: bool,
}

impl Security {
    /// Absolute change between the previous and the current price.
    #[must_use]
    pub fn price_change(&self) -> Decimal {
        self.current_price - self.previous_price
    }

    /// Relative change in percent, `None` when the previous price is zero.
    #[must_use]
    pub fn price_change_percent(&self) -> Option<Decimal> {
        if self.previous_price.is_zero() {
            return None;
        }
        Some(self.price_change() / self.previous_price * Decimal::ONE_HUNDRED)
    }
}

// =============================================================================
// Push Events
// =============================================================================

/// A single price tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Ticker.
    pub symbol: Symbol,
    /// Traded price.
    pub price: Decimal,
    /// Tick time.
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// An executed trade.
///
/// Trade IDs are unique and never reused within a symbol's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeMessage {
    /// Unique trade identifier.
    pub trade_id: i64,
    /// Ticker.
    pub symbol: Symbol,
    /// Matched buy order.
    pub buy_order_id: i64,
    /// Matched sell order.
    pub sell_order_id: i64,
    /// Buying client.
    pub buyer_client_id: String,
    /// Selling client.
    pub seller_client_id: String,
    /// Executed quantity.
    pub quantity: i64,
    /// Execution price.
    pub price: Decimal,
    /// Execution time.
    #[serde(with = "timestamp")]
    pub executed_at: DateTime<Utc>,
}

/// Batched notification of trades executed for a symbol since the last update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketUpdate {
    /// Ticker.
    pub symbol: Symbol,
    /// Price after the batch.
    pub current_price: Decimal,
    /// Trades in execution order (may be empty).
    #[serde(default)]
    pub trades: Vec<TradeMessage>,
    /// Time of the update.
    #[serde(with = "timestamp")]
    pub last_updated: DateTime<Utc>,
}

/// Reply to a current-price request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPrice {
    /// Ticker.
    pub symbol: Symbol,
    /// Current price.
    pub price: Decimal,
    /// Snapshot time.
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// A point of a price series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    /// Point time.
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Price at that time.
    pub price: Decimal,
    /// Volume, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
}

impl PricePoint {
    /// Create a point without volume.
    #[must_use]
    pub const fn new(timestamp: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            timestamp,
            price,
            volume: None,
        }
    }
}

impl From<&PriceUpdate> for PricePoint {
    fn from(update: &PriceUpdate) -> Self {
        Self::new(update.timestamp, update.price)
    }
}

impl From<&CurrentPrice> for PricePoint {
    fn from(snapshot: &CurrentPrice) -> Self {
        Self::new(snapshot.timestamp, snapshot.price)
    }
}

impl From<&MarketUpdate> for PricePoint {
    fn from(update: &MarketUpdate) -> Self {
        Self::new(update.last_updated, update.current_price)
    }
}

/// Reply to a price-history request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceHistory {
    /// Ticker.
    pub symbol: Symbol,
    /// Points in the requested window.
    #[serde(default)]
    pub history: Vec<PricePoint>,
}

// =============================================================================
// Connection Lifecycle
// =============================================================================

/// Connection state of the streaming client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport. Initial state, and terminal state after giving up.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Transport open, events flowing.
    Connected,
    /// Transport lost or attempt failed, retrying with backoff.
    Reconnecting,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications delivered to connection listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport opened; `replayed` queued operations were flushed.
    Connected {
        /// Number of operations sent during replay.
        replayed: usize,
    },
    /// Transport lost while connected.
    Lost,
    /// A reconnection attempt is scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Permanent failure: the attempt budget is exhausted.
    GaveUp {
        /// Attempts made before giving up.
        attempts: u32,
        /// Last transport error, if any.
        last_error: Option<String>,
    },
    /// Explicit teardown by the owner.
    Closed,
}

// =============================================================================
// Event Kinds
// =============================================================================

/// Inbound event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Price ticks.
    PriceUpdate,
    /// Batched market updates.
    MarketUpdate,
    /// Current-price replies.
    CurrentPrice,
    /// Price-history replies.
    PriceHistory,
    /// Individual trade messages.
    Trade,
    /// Connection lifecycle.
    Connection,
}

impl EventKind {
    /// Get the metric label for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriceUpdate => "price_update",
            Self::MarketUpdate => "market_update",
            Self::CurrentPrice => "current_price",
            Self::PriceHistory => "price_history",
            Self::Trade => "trade",
            Self::Connection => "connection",
        }
    }
}

/// Events that can be fanned out to listeners.
pub trait MarketEvent: Clone + Send + 'static {
    /// Channel this event travels on.
    const KIND: EventKind;

    /// Symbol the event refers to, if any.
    fn symbol(&self) -> Option<&str>;
}

impl MarketEvent for PriceUpdate {
    const KIND: EventKind = EventKind::PriceUpdate;

    fn symbol(&self) -> Option<&str> {
        Some(&self.symbol)
    }
}

impl MarketEvent for MarketUpdate {
    const KIND: EventKind = EventKind::MarketUpdate;

    fn symbol(&self) -> Option<&str> {
        Some(&self.symbol)
    }
}

impl MarketEvent for CurrentPrice {
    const KIND: EventKind = EventKind::CurrentPrice;

    fn symbol(&self) -> Option<&str> {
        Some(&self.symbol)
    }
}

impl MarketEvent for PriceHistory {
    const KIND: EventKind = EventKind::PriceHistory;

    fn symbol(&self) -> Option<&str> {
        Some(&self.symbol)
    }
}

impl MarketEvent for TradeMessage {
    const KIND: EventKind = EventKind::Trade;

    fn symbol(&self) -> Option<&str> {
        Some(&self.symbol)
    }
}

impl MarketEvent for ConnectionEvent {
    const KIND: EventKind = EventKind::Connection;

    fn symbol(&self) -> Option<&str> {
        None
    }
}

// =============================================================================
// Request Correlation
// =============================================================================

/// Correlation token assigned to every current-price or history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier echoed back by the hub.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of reply a request waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    /// `CurrentPrice` push.
    CurrentPrice,
    /// `PriceHistory` push.
    PriceHistory,
}

impl ReplyKind {
    /// Get the kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CurrentPrice => "current_price",
            Self::PriceHistory => "price_history",
        }
    }
}

impl fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn security(current: Decimal, previous: Decimal) -> Security {
        Security {
            id: 1,
            symbol: "GOOGL".to_string(),
            company_name: "Alphabet Inc".to_string(),
            current_price: current,
            previous_price: previous,
            volume: 1_000_000,
            last_updated: Utc::now(),
            is_active: true,
        }
    }

    #[test]
    fn security_price_change() {
        let s = security(dec!(2800), dec!(2795));
        assert_eq!(s.price_change(), dec!(5));
        assert!(s.price_change_percent().unwrap() > Decimal::ZERO);
    }

    #[test]
    fn security_price_change_percent_zero_previous() {
        let s = security(dec!(10), Decimal::ZERO);
        assert!(s.price_change_percent().is_none());
    }

    #[test]
    fn security_deserializes_from_camel_case() {
        let json = r#"{
            "id": 2,
            "symbol": "TSLA",
            "companyName": "Tesla Inc.",
            "currentPrice": 800.00,
            "previousPrice": 790.00,
            "volume": 0,
            "lastUpdated": "2024-05-01T12:00:00Z",
            "isActive": true
        }"#;

        let s: Security = serde_json::from_str(json).unwrap();
        assert_eq!(s.symbol, "TSLA");
        assert_eq!(s.current_price, dec!(800));
        assert!(s.is_active);
    }

    #[test]
    fn market_update_without_trades_field() {
        let json = r#"{"symbol":"GOOGL","currentPrice":2801.5,"lastUpdated":"2024-05-01T12:00:00"}"#;
        let update: MarketUpdate = serde_json::from_str(json).unwrap();
        assert!(update.trades.is_empty());
        assert_eq!(update.current_price, dec!(2801.5));
    }

    #[test]
    fn price_point_volume_optional() {
        let json = r#"{"timestamp":"2024-05-01T12:00:00Z","price":10}"#;
        let point: PricePoint = serde_json::from_str(json).unwrap();
        assert!(point.volume.is_none());
    }

    #[test]
    fn event_symbols() {
        let update = PriceUpdate {
            symbol: "TSLA".to_string(),
            price: dec!(810),
            timestamp: Utc::now(),
        };
        assert_eq!(MarketEvent::symbol(&update), Some("TSLA"));
        assert_eq!(MarketEvent::symbol(&ConnectionEvent::Closed), None);
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn request_id_parses_own_display() {
        let id = RequestId::new();
        assert_eq!(RequestId::parse(&id.to_string()), Some(id));
        assert!(RequestId::parse("42").is_none());
    }

    #[test]
    fn connection_state_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}

//! Order Types
//!
//! Outbound order requests and the typed outcome of a submission. Orders are
//! serialized as the trading backend's order endpoint expects them: camelCase
//! fields, prices as JSON numbers, and a `"NEW"` action.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::{Symbol, timestamp};

// =============================================================================
// Order Attributes
// =============================================================================

/// Order pricing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Execute at the prevailing price.
    Market,
    /// Execute at the limit price or better.
    Limit,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "Buy"),
            Self::Sell => write!(f, "Sell"),
        }
    }
}

/// Order lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderAction {
    /// A new order.
    #[default]
    New,
}

// =============================================================================
// Order
// =============================================================================

/// An outbound order request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Backend identifier, absent on new orders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Submitting client.
    pub client_id: String,
    /// Ticker.
    pub symbol: Symbol,
    /// Pricing type.
    pub order_type: OrderType,
    /// Side.
    pub side: OrderSide,
    /// Share count.
    pub quantity: i64,
    /// Limit price, or the reference price for market orders.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Submission time.
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Lifecycle action.
    pub action: OrderAction,
}

impl Order {
    /// Create a new order stamped with the current time.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        symbol: impl Into<Symbol>,
        order_type: OrderType,
        side: OrderSide,
        quantity: i64,
        price: Decimal,
    ) -> Self {
        Self {
            id: None,
            client_id: client_id.into(),
            symbol: symbol.into(),
            order_type,
            side,
            quantity,
            price,
            timestamp: Utc::now(),
            action: OrderAction::New,
        }
    }

    /// Whether the order can be sent: positive quantity and positive price.
    #[must_use]
    pub fn is_submittable(&self) -> bool {
        self.quantity > 0 && self.price > Decimal::ZERO
    }

    /// Copy of the order stamped with `at`.
    #[must_use]
    pub fn stamped(&self, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at,
            ..self.clone()
        }
    }

    /// Order value; market orders are valued at `market_price`.
    #[must_use]
    pub fn notional(&self, market_price: Decimal) -> Decimal {
        let price = match self.order_type {
            OrderType::Market => market_price,
            OrderType::Limit => self.price,
        };
        price * Decimal::from(self.quantity)
    }
}

/// Keep submittable orders and stamp copies of them with `at`.
///
/// The input slice is left untouched.
#[must_use]
pub fn prepare_bulk(orders: &[Order], at: DateTime<Utc>) -> Vec<Order> {
    orders
        .iter()
        .filter(|order| order.is_submittable())
        .map(|order| order.stamped(at))
        .collect()
}

/// Total value of a batch of orders.
#[must_use]
pub fn total_value(orders: &[Order], market_price: Decimal) -> Decimal {
    orders.iter().map(|order| order.notional(market_price)).sum()
}

// =============================================================================
// Submission Result
// =============================================================================

/// Outcome of an order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionResult {
    /// Whether the backend accepted the submission.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Orders actually sent.
    pub submitted: usize,
}

impl SubmissionResult {
    /// Accepted submission of `submitted` orders.
    #[must_use]
    pub fn accepted(submitted: usize, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            submitted,
        }
    }

    /// Failed submission.
    #[must_use]
    pub fn failed(submitted: usize, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            submitted,
        }
    }
}

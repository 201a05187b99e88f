//! Order Placement Service
//!
//! Validates and stamps orders before handing them to an [`OrderGateway`],
//! and resolves the securities list with a built-in fallback.

use chrono::Utc;
use rust_decimal::Decimal;

use crate::application::ports::{OrderGateway, SecuritiesDirectory};
use crate::domain::orders::{Order, SubmissionResult, prepare_bulk};
use crate::domain::streaming::Security;

/// Message when a bulk batch has nothing left after filtering.
pub const NO_VALID_ORDERS: &str = "No valid orders to place";

/// Places orders through a gateway.
#[derive(Debug, Clone)]
pub struct OrderService<G> {
    gateway: G,
}

impl<G: OrderGateway> OrderService<G> {
    /// Create a new service.
    pub const fn new(gateway: G) -> Self {
        Self { gateway }
    }

    /// Underlying gateway.
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Submit a single order stamped with the submission time.
    pub async fn place_order(&self, order: &Order) -> SubmissionResult {
        let stamped = order.stamped(Utc::now());
        tracing::info!(
            symbol = %stamped.symbol,
            side = %stamped.side,
            quantity = stamped.quantity,
            price = %stamped.price,
            "Placing order"
        );
        self.gateway.submit_orders(std::slice::from_ref(&stamped)).await
    }

    /// Submit every order with positive quantity and price in one request.
    ///
    /// Invalid entries are dropped. Nothing is sent when no entry survives.
    pub async fn place_bulk_orders(&self, orders: &[Order]) -> SubmissionResult {
        let valid = prepare_bulk(orders, Utc::now());
        let dropped = orders.len() - valid.len();

        if valid.is_empty() {
            tracing::warn!(received = orders.len(), "No valid orders in bulk submission");
            return SubmissionResult::failed(0, NO_VALID_ORDERS);
        }
        if dropped > 0 {
            tracing::info!(dropped, kept = valid.len(), "Dropped invalid bulk orders");
        }

        let result = self.gateway.submit_orders(&valid).await;
        if result.success {
            let count = valid.len();
            SubmissionResult::accepted(count, format!("{count} orders placed successfully"))
        } else {
            result
        }
    }
}

/// Built-in securities used when the directory cannot be reached.
#[must_use]
pub fn fallback_securities() -> Vec<Security> {
    let now = Utc::now();
    vec![
        Security {
            id: 1,
            symbol: "GOOGL".to_string(),
            company_name: "Alphabet Inc".to_string(),
            current_price: Decimal::from(2800),
            previous_price: Decimal::from(2795),
            volume: 1_000_000,
            last_updated: now,
            is_active: true,
        },
        Security {
            id: 2,
            symbol: "TSLA".to_string(),
            company_name: "Tesla Inc.".to_string(),
            current_price: Decimal::from(800),
            previous_price: Decimal::from(790),
            volume: 0,
            last_updated: now,
            is_active: true,
        },
    ]
}

/// Fetch the securities directory, substituting [`fallback_securities`] on failure.
pub async fn securities_or_fallback<D: SecuritiesDirectory + ?Sized>(directory: &D) -> Vec<Security> {
    match directory.list_securities().await {
        Ok(securities) => securities,
        Err(e) => {
            tracing::warn!(error = %e, "Securities directory unavailable, using fallback set");
            fallback_securities()
        }
    }
}

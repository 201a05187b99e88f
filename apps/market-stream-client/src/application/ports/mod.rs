//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamTransport`: opens a link to the market data hub
//! - `OrderGateway`: submits orders to the trading backend
//! - `SecuritiesDirectory`: lists tradable securities

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::orders::{Order, SubmissionResult};
use crate::domain::streaming::{
    CurrentPrice, MarketUpdate, PriceHistory, PriceUpdate, RequestId, Security, Symbol,
    TradeMessage,
};

// =============================================================================
// Streaming Transport
// =============================================================================

/// Logical operations sent to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubRequest {
    /// Join the symbol's market group.
    JoinGroup {
        /// Ticker.
        symbol: Symbol,
    },
    /// Leave the symbol's market group.
    LeaveGroup {
        /// Ticker.
        symbol: Symbol,
    },
    /// Ask for a current-price snapshot.
    RequestCurrentPrice {
        /// Ticker.
        symbol: Symbol,
        /// Correlation token.
        request_id: RequestId,
    },
    /// Ask for price history in `[from, to]`.
    RequestPriceHistory {
        /// Ticker.
        symbol: Symbol,
        /// Window start.
        from: DateTime<Utc>,
        /// Window end.
        to: DateTime<Utc>,
        /// Correlation token.
        request_id: RequestId,
    },
}

impl HubRequest {
    /// Symbol the operation refers to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::JoinGroup { symbol }
            | Self::LeaveGroup { symbol }
            | Self::RequestCurrentPrice { symbol, .. }
            | Self::RequestPriceHistory { symbol, .. } => symbol,
        }
    }

    /// Correlation token, for request operations.
    #[must_use]
    pub const fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::JoinGroup { .. } | Self::LeaveGroup { .. } => None,
            Self::RequestCurrentPrice { request_id, .. }
            | Self::RequestPriceHistory { request_id, .. } => Some(*request_id),
        }
    }
}

/// Inbound events decoded from the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// Price tick.
    PriceUpdate(PriceUpdate),
    /// Batched market update.
    MarketUpdate(MarketUpdate),
    /// Current-price reply.
    CurrentPrice(CurrentPrice),
    /// Price-history reply.
    PriceHistory(PriceHistory),
    /// Individual trade.
    Trade(TradeMessage),
    /// Completion of an invocation carrying an id.
    Completion {
        /// Invocation id echoed by the server.
        invocation_id: String,
        /// Server-side error, if the invocation failed.
        error: Option<String>,
    },
}

/// An open link to the hub.
///
/// The link is alive while `inbound` yields events. Dropping `outbound`
/// closes the link.
#[derive(Debug)]
pub struct TransportLink {
    /// Operations to send.
    pub outbound: mpsc::UnboundedSender<HubRequest>,
    /// Decoded events, in wire-arrival order. `None` means the link is lost.
    pub inbound: mpsc::Receiver<HubEvent>,
}

/// Errors opening a transport link.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Could not reach the endpoint.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The hub refused or did not complete the handshake.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Opens links to the market data hub.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a new link. Each call yields an independent connection.
    async fn open(&self) -> Result<TransportLink, TransportError>;
}

// =============================================================================
// Order Gateway
// =============================================================================

/// Errors talking to the trading backend's HTTP API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Request could not be sent or no response arrived.
    #[error("network error: {0}")]
    Network(String),
    /// Non-success status.
    #[error("request rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Submits orders to the trading backend.
///
/// Implementations never fail past this boundary: every outcome is a
/// [`SubmissionResult`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit a batch of orders in one request.
    async fn submit_orders(&self, orders: &[Order]) -> SubmissionResult;
}

/// Lists tradable securities.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecuritiesDirectory: Send + Sync {
    /// Fetch the directory.
    async fn list_securities(&self) -> Result<Vec<Security>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_symbol_and_id() {
        let id = RequestId::new();
        let request = HubRequest::RequestCurrentPrice {
            symbol: "GOOGL".to_string(),
            request_id: id,
        };
        assert_eq!(request.symbol(), "GOOGL");
        assert_eq!(request.request_id(), Some(id));

        let join = HubRequest::JoinGroup {
            symbol: "TSLA".to_string(),
        };
        assert_eq!(join.symbol(), "TSLA");
        assert!(join.request_id().is_none());
    }

    #[test]
    fn gateway_error_display() {
        let err = GatewayError::Rejected {
            status: 400,
            body: "bad".to_string(),
        };
        assert_eq!(err.to_string(), "request rejected with status 400: bad");
    }
}

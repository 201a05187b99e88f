#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! Market Stream Client - Real-Time Market Data Client
//!
//! A client library that keeps a single streaming connection to a trading
//! backend's market data hub and multiplexes per-symbol subscriptions to any
//! number of local listeners. It also submits orders over the backend's HTTP
//! API.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Market data types and local state
//!   - `streaming`: Securities, ticks, market updates, history, lifecycle events
//!   - `subscription`: Reference-counted group membership
//!   - `price_book`: Per-symbol price series and trade tapes
//!   - `orders`: Orders and submission results
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Hub transport, order gateway, securities directory
//!   - `services`: Streaming client, order placement, reconnect policy
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `hub`: WebSocket transport speaking the JSON hub protocol
//!   - `gateway`: HTTP order gateway
//!   - `broadcast`: Per-kind fan-out channels
//!   - `config`: Environment configuration
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                       ┌─────────────────┐     ┌───────────┐
//! Market data hub ──WS──►  Session task   ├────►│  EventHub │──► Listener 1
//!                       │ (membership,    │     │ (per-kind │──► Listener 2
//!                       │  replay, book)  │     │ broadcast)│──► Listener N
//!                       └─────────────────┘     └───────────┘
//! Trading backend ◄─HTTP── OrderService / HttpOrderGateway
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data types and local state with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::orders::{Order, OrderAction, OrderSide, OrderType, SubmissionResult};
pub use domain::price_book::{MergeOutcome, PriceBook, TickOutcome, TradeTape};
pub use domain::streaming::{
    ConnectionEvent, ConnectionState, CurrentPrice, EventKind, MarketEvent, MarketUpdate,
    PriceHistory, PricePoint, PriceUpdate, ReplyKind, RequestId, Security, Symbol, TradeMessage,
};
pub use domain::subscription::{MembershipChange, SubscriptionBook, SubscriptionStats};

// Ports
pub use application::ports::{
    GatewayError, HubEvent, HubRequest, OrderGateway, SecuritiesDirectory, StreamTransport,
    TransportError, TransportLink,
};

// Services
pub use application::services::{
    ClientError, OrderService, ReconnectConfig, ReconnectPolicy, StreamingMarketClient,
    fallback_securities, securities_or_fallback,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, GatewaySettings, StreamSettings};

// Event fan-out
pub use infrastructure::broadcast::{EventHub, EventHubConfig, EventHubStats, EventSubscription};

// Adapters
pub use infrastructure::gateway::HttpOrderGateway;
pub use infrastructure::hub::{HubConnectionConfig, WebSocketTransport};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

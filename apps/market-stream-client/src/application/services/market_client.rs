//! Streaming Market Client
//!
//! Caller-owned client for the market data hub. One client holds at most
//! one transport link and keeps, across reconnects:
//!
//! - reference-counted group membership, replayed after every reconnect
//! - operations issued while offline, replayed in issue order
//! - per-symbol price series and trade tape
//! - listener registries, one fan-out channel per event kind
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use market_stream_client::{ClientConfig, StreamingMarketClient};
//! use market_stream_client::infrastructure::hub::{HubConnectionConfig, WebSocketTransport};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let transport = WebSocketTransport::new(HubConnectionConfig::from_client_config(&config));
//! let client = StreamingMarketClient::new(&config.stream, Arc::new(transport));
//!
//! let mut ticks = client.price_updates().for_symbol("TSLA");
//! client.subscribe("TSLA");
//! client.connect();
//! client.connected().await?;
//!
//! let snapshot = client.current_price("TSLA", Duration::from_secs(5)).await?;
//! println!("TSLA at {}", snapshot.price);
//! while let Some(tick) = ticks.recv().await {
//!     println!("{} {}", tick.symbol, tick.price);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::session::{self, ClientCore, SessionHandle};
use crate::StreamSettings;
use crate::application::ports::{StreamTransport, TransportError};
use crate::domain::streaming::{
    ConnectionEvent, ConnectionState, CurrentPrice, MarketUpdate, PriceHistory, PricePoint,
    PriceUpdate, ReplyKind, RequestId, Symbol, TradeMessage,
};
use crate::domain::subscription::{MembershipChange, SubscriptionStats};
use crate::infrastructure::broadcast::{EventHub, EventHubConfig, EventSubscription};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors surfaced to client callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The transport could not be opened.
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    /// The reconnect budget is exhausted; the client is disconnected.
    #[error("gave up after {attempts} reconnect attempts")]
    GaveUp {
        /// Attempts made.
        attempts: u32,
    },

    /// No reply arrived in time.
    #[error("{kind} request for {symbol} timed out after {after:?}")]
    RequestTimeout {
        /// Requested symbol.
        symbol: Symbol,
        /// Request kind.
        kind: ReplyKind,
        /// Time waited.
        after: Duration,
    },

    /// The hub answered the request with an error.
    #[error("{kind} request for {symbol} rejected: {reason}")]
    Rejected {
        /// Requested symbol.
        symbol: Symbol,
        /// Request kind.
        kind: ReplyKind,
        /// Server-provided reason.
        reason: String,
    },

    /// The client was disconnected while waiting.
    #[error("client disconnected")]
    Disconnected,
}

// =============================================================================
// Client
// =============================================================================

/// Client for the market data hub.
///
/// Dropping the client stops its session task.
pub struct StreamingMarketClient {
    core: Arc<ClientCore>,
    transport: Arc<dyn StreamTransport>,
    reconnect: ReconnectConfig,
    request_timeout: Duration,
    session: Mutex<Option<SessionHandle>>,
}

impl std::fmt::Debug for StreamingMarketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingMarketClient")
            .field("state", &self.state())
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

impl StreamingMarketClient {
    /// Create a disconnected client.
    #[must_use]
    pub fn new(settings: &StreamSettings, transport: Arc<dyn StreamTransport>) -> Self {
        let events = Arc::new(EventHub::new(EventHubConfig::from(settings)));
        Self {
            core: Arc::new(ClientCore::new(
                events,
                settings.series_capacity,
                settings.trade_tape_capacity,
            )),
            transport,
            reconnect: ReconnectConfig::from_stream_settings(settings),
            request_timeout: settings.request_timeout,
            session: Mutex::new(None),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the session. No-op while a session is already running.
    ///
    /// Returns immediately; await [`Self::connected`] or watch the state to
    /// observe the outcome. Must be called within a Tokio runtime.
    pub fn connect(&self) {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|s| !s.task.is_finished()) {
            tracing::debug!("Session already running");
            return;
        }

        self.core.begin_connect();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session::run(
            Arc::clone(&self.core),
            Arc::clone(&self.transport),
            ReconnectPolicy::new(self.reconnect.clone()),
            cancel.clone(),
        ));
        *session = Some(SessionHandle { cancel, task });
    }

    /// Wait until the client is connected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::GaveUp`] when the session exhausted its attempts
    /// and [`ClientError::Disconnected`] when the client is (or becomes)
    /// disconnected for any other reason, including never calling `connect`.
    pub async fn connected(&self) -> Result<(), ClientError> {
        let mut state_rx = self.core.watch_state();
        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => {
                    return Err(self
                        .core
                        .gave_up()
                        .map_or(ClientError::Disconnected, |attempts| {
                            ClientError::GaveUp { attempts }
                        }));
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(ClientError::Disconnected);
            }
        }
    }

    /// Tear down the session from any state.
    ///
    /// Membership and listeners are kept for a later [`Self::connect`];
    /// in-flight request waiters fail with [`ClientError::Disconnected`].
    pub fn disconnect(&self) {
        let handle = self.session.lock().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            self.core.shutdown();
            tracing::info!("Disconnected from market data hub");
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.watch_state()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to a symbol's market group.
    ///
    /// Only the first holder joins the group on the wire.
    pub fn subscribe(&self, symbol: &str) -> MembershipChange {
        let change = self.core.subscribe(symbol);
        tracing::debug!(symbol, ?change, "Subscribe");
        change
    }

    /// Release one hold on a symbol's market group.
    ///
    /// Only the last holder leaves the group; releasing a symbol that is not
    /// held does nothing.
    pub fn unsubscribe(&self, symbol: &str) -> MembershipChange {
        let change = self.core.unsubscribe(symbol);
        tracing::debug!(symbol, ?change, "Unsubscribe");
        change
    }

    /// Symbols currently held, sorted.
    #[must_use]
    pub fn subscribed_symbols(&self) -> Vec<Symbol> {
        self.core.with_state(|state| state.membership.active_symbols())
    }

    /// Membership statistics.
    #[must_use]
    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.core.with_state(|state| state.membership.stats())
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Ask for the current price. The reply arrives on [`Self::current_prices`].
    pub fn request_current_price(&self, symbol: &str) -> RequestId {
        self.core.request_current_price(symbol, None)
    }

    /// Ask for price history in `[from, to]`. The reply arrives on
    /// [`Self::price_histories`].
    pub fn request_price_history(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RequestId {
        self.core.request_price_history(symbol, from, to, None)
    }

    /// Request the current price and wait for the next reply for `symbol`.
    ///
    /// # Errors
    ///
    /// [`ClientError::RequestTimeout`] when no reply arrives within `timeout`,
    /// [`ClientError::Rejected`] when the hub fails the request and
    /// [`ClientError::Disconnected`] when the client is torn down first.
    pub async fn current_price(
        &self,
        symbol: &str,
        timeout: Duration,
    ) -> Result<CurrentPrice, ClientError> {
        let (tx, rx) = oneshot::channel();
        let request_id = self.core.request_current_price(symbol, Some(tx));
        tracing::debug!(symbol, request_id = %request_id, "Awaiting current price");
        await_reply(rx, symbol, ReplyKind::CurrentPrice, timeout).await
    }

    /// Request price history and wait for the next history reply for `symbol`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::current_price`].
    pub async fn price_history(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<PriceHistory, ClientError> {
        let (tx, rx) = oneshot::channel();
        let request_id = self.core.request_price_history(symbol, from, to, Some(tx));
        tracing::debug!(symbol, request_id = %request_id, "Awaiting price history");
        await_reply(rx, symbol, ReplyKind::PriceHistory, timeout).await
    }

    /// Configured default timeout for awaitable requests.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    // =========================================================================
    // Listeners
    // =========================================================================
    //
    // Each listener buffers at most `event_capacity` events of its kind. A
    // listener that falls further behind than that loses the oldest events:
    // the gap is logged and counted, and delivery resumes with the oldest
    // event still buffered.

    /// Register a price tick listener.
    ///
    /// Ticks are lost if this listener lags by more than `event_capacity`.
    #[must_use]
    pub fn price_updates(&self) -> EventSubscription<PriceUpdate> {
        self.core.events.price_updates()
    }

    /// Register a market update listener.
    ///
    /// Updates are lost if this listener lags by more than `event_capacity`.
    #[must_use]
    pub fn market_updates(&self) -> EventSubscription<MarketUpdate> {
        self.core.events.market_updates()
    }

    /// Register a current-price reply listener.
    ///
    /// Replies are lost if this listener lags by more than `event_capacity`.
    #[must_use]
    pub fn current_prices(&self) -> EventSubscription<CurrentPrice> {
        self.core.events.current_prices()
    }

    /// Register a price-history reply listener.
    ///
    /// Replies are lost if this listener lags by more than `event_capacity`.
    #[must_use]
    pub fn price_histories(&self) -> EventSubscription<PriceHistory> {
        self.core.events.price_histories()
    }

    /// Register a trade listener.
    ///
    /// Trades are lost if this listener lags by more than `event_capacity`.
    #[must_use]
    pub fn trades(&self) -> EventSubscription<TradeMessage> {
        self.core.events.trades()
    }

    /// Register a connection lifecycle listener.
    ///
    /// Lifecycle events are lost if this listener lags by more than `event_capacity`.
    #[must_use]
    pub fn connection_events(&self) -> EventSubscription<ConnectionEvent> {
        self.core.events.connection_events()
    }

    // =========================================================================
    // Local Views
    // =========================================================================

    /// Point with the greatest timestamp seen for `symbol`.
    #[must_use]
    pub fn latest_price(&self, symbol: &str) -> Option<PricePoint> {
        self.core.with_state(|state| state.book.latest(symbol))
    }

    /// Copy of the visible price series for `symbol`, oldest first.
    #[must_use]
    pub fn price_series(&self, symbol: &str) -> Vec<PricePoint> {
        self.core.with_state(|state| state.book.series(symbol))
    }

    /// Copy of the trade tape for `symbol`, in arrival order.
    #[must_use]
    pub fn trade_tape(&self, symbol: &str) -> Vec<TradeMessage> {
        self.core.with_state(|state| state.tape.trades(symbol))
    }
}

impl Drop for StreamingMarketClient {
    fn drop(&mut self) {
        if let Some(handle) = self.session.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}

async fn await_reply<T>(
    rx: oneshot::Receiver<Result<T, ClientError>>,
    symbol: &str,
    kind: ReplyKind,
    timeout: Duration,
) -> Result<T, ClientError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(ClientError::Disconnected),
        Err(_) => {
            tracing::warn!(symbol, kind = %kind, timeout_ms = timeout.as_millis(), "Request timed out");
            metrics::record_request_timeout(kind);
            Err(ClientError::RequestTimeout {
                symbol: symbol.to_string(),
                kind,
                after: timeout,
            })
        }
    }
}

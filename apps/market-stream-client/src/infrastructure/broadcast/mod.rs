//! Broadcast Channel Adapters
//!
//! Implements event fan-out using tokio broadcast channels.
//!
//! # Architecture
//!
//! The `EventHub` provides one channel per inbound event type:
//! - Price ticks and batched market updates
//! - Current-price and price-history replies
//! - Individual trade messages
//! - Connection lifecycle events
//!
//! Every listener holds its own receiver, so a slow listener only lags
//! itself. Dropping an [`EventSubscription`] unregisters it.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::StreamSettings;
use crate::domain::streaming::{
    ConnectionEvent, CurrentPrice, MarketEvent, MarketUpdate, PriceHistory, PriceUpdate, Symbol,
    TradeMessage,
};
use crate::infrastructure::metrics;

// =============================================================================
// Event Hub
// =============================================================================

/// Configuration for event channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct EventHubConfig {
    /// Capacity for the price tick channel.
    pub price_updates_capacity: usize,
    /// Capacity for the market update channel.
    pub market_updates_capacity: usize,
    /// Capacity for the current-price reply channel.
    pub current_prices_capacity: usize,
    /// Capacity for the price-history reply channel.
    pub price_histories_capacity: usize,
    /// Capacity for the trade channel.
    pub trades_capacity: usize,
    /// Capacity for the connection event channel.
    pub connection_events_capacity: usize,
}

impl EventHubConfig {
    /// Same capacity on every data channel.
    #[must_use]
    pub const fn uniform(capacity: usize) -> Self {
        Self {
            price_updates_capacity: capacity,
            market_updates_capacity: capacity,
            current_prices_capacity: capacity,
            price_histories_capacity: capacity,
            trades_capacity: capacity,
            connection_events_capacity: 64,
        }
    }
}

impl Default for EventHubConfig {
    fn default() -> Self {
        Self::uniform(1024)
    }
}

impl From<&StreamSettings> for EventHubConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self::uniform(settings.event_capacity)
    }
}

/// Central hub for all event channels.
///
/// # Example
///
/// ```rust
/// use market_stream_client::infrastructure::broadcast::{EventHub, EventHubConfig};
///
/// let hub = EventHub::new(EventHubConfig::default());
///
/// // Register a listener for price ticks, only for TSLA
/// let listener = hub.price_updates().for_symbol("TSLA");
/// assert_eq!(hub.stats().price_updates_listeners, 1);
/// drop(listener);
/// assert_eq!(hub.stats().price_updates_listeners, 0);
/// ```
#[derive(Debug)]
#[allow(clippy::struct_field_names)]
pub struct EventHub {
    price_updates_tx: broadcast::Sender<PriceUpdate>,
    market_updates_tx: broadcast::Sender<MarketUpdate>,
    current_prices_tx: broadcast::Sender<CurrentPrice>,
    price_histories_tx: broadcast::Sender<PriceHistory>,
    trades_tx: broadcast::Sender<TradeMessage>,
    connection_events_tx: broadcast::Sender<ConnectionEvent>,
}

impl EventHub {
    /// Create a new hub with the given configuration.
    #[must_use]
    pub fn new(config: EventHubConfig) -> Self {
        Self {
            price_updates_tx: broadcast::channel(config.price_updates_capacity.max(1)).0,
            market_updates_tx: broadcast::channel(config.market_updates_capacity.max(1)).0,
            current_prices_tx: broadcast::channel(config.current_prices_capacity.max(1)).0,
            price_histories_tx: broadcast::channel(config.price_histories_capacity.max(1)).0,
            trades_tx: broadcast::channel(config.trades_capacity.max(1)).0,
            connection_events_tx: broadcast::channel(config.connection_events_capacity.max(1)).0,
        }
    }

    /// Create a new hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(EventHubConfig::default())
    }

    // =========================================================================
    // Send
    // =========================================================================

    /// Send a price tick to all listeners.
    ///
    /// Returns the number of listeners that received it, or `None` if there
    /// are no listeners.
    pub fn send_price_update(&self, update: PriceUpdate) -> Option<usize> {
        self.price_updates_tx.send(update).ok()
    }

    /// Send a market update to all listeners.
    pub fn send_market_update(&self, update: MarketUpdate) -> Option<usize> {
        self.market_updates_tx.send(update).ok()
    }

    /// Send a current-price reply to all listeners.
    pub fn send_current_price(&self, reply: CurrentPrice) -> Option<usize> {
        self.current_prices_tx.send(reply).ok()
    }

    /// Send a price-history reply to all listeners.
    pub fn send_price_history(&self, reply: PriceHistory) -> Option<usize> {
        self.price_histories_tx.send(reply).ok()
    }

    /// Send a trade to all listeners.
    pub fn send_trade(&self, trade: TradeMessage) -> Option<usize> {
        self.trades_tx.send(trade).ok()
    }

    /// Send a connection event to all listeners.
    pub fn send_connection_event(&self, event: ConnectionEvent) -> Option<usize> {
        self.connection_events_tx.send(event).ok()
    }

    // =========================================================================
    // Listen
    // =========================================================================

    /// Register a price tick listener.
    #[must_use]
    pub fn price_updates(&self) -> EventSubscription<PriceUpdate> {
        EventSubscription::new(self.price_updates_tx.subscribe())
    }

    /// Register a market update listener.
    #[must_use]
    pub fn market_updates(&self) -> EventSubscription<MarketUpdate> {
        EventSubscription::new(self.market_updates_tx.subscribe())
    }

    /// Register a current-price reply listener.
    #[must_use]
    pub fn current_prices(&self) -> EventSubscription<CurrentPrice> {
        EventSubscription::new(self.current_prices_tx.subscribe())
    }

    /// Register a price-history reply listener.
    #[must_use]
    pub fn price_histories(&self) -> EventSubscription<PriceHistory> {
        EventSubscription::new(self.price_histories_tx.subscribe())
    }

    /// Register a trade listener.
    #[must_use]
    pub fn trades(&self) -> EventSubscription<TradeMessage> {
        EventSubscription::new(self.trades_tx.subscribe())
    }

    /// Register a connection event listener.
    #[must_use]
    pub fn connection_events(&self) -> EventSubscription<ConnectionEvent> {
        EventSubscription::new(self.connection_events_tx.subscribe())
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get listener counts for all channels.
    #[must_use]
    pub fn stats(&self) -> EventHubStats {
        EventHubStats {
            price_updates_listeners: self.price_updates_tx.receiver_count(),
            market_updates_listeners: self.market_updates_tx.receiver_count(),
            current_prices_listeners: self.current_prices_tx.receiver_count(),
            price_histories_listeners: self.price_histories_tx.receiver_count(),
            trades_listeners: self.trades_tx.receiver_count(),
            connection_events_listeners: self.connection_events_tx.receiver_count(),
        }
    }
}

/// Listener counts per channel.
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_field_names)]
pub struct EventHubStats {
    /// Price tick listeners.
    pub price_updates_listeners: usize,
    /// Market update listeners.
    pub market_updates_listeners: usize,
    /// Current-price reply listeners.
    pub current_prices_listeners: usize,
    /// Price-history reply listeners.
    pub price_histories_listeners: usize,
    /// Trade listeners.
    pub trades_listeners: usize,
    /// Connection event listeners.
    pub connection_events_listeners: usize,
}

impl EventHubStats {
    /// Get total number of listeners across all channels.
    #[must_use]
    pub const fn total_listeners(&self) -> usize {
        self.price_updates_listeners
            + self.market_updates_listeners
            + self.current_prices_listeners
            + self.price_histories_listeners
            + self.trades_listeners
            + self.connection_events_listeners
    }
}

// =============================================================================
// Event Subscription
// =============================================================================

/// A registered listener on one event channel.
///
/// The channel retains the most recent `capacity` events. A listener more
/// than `capacity` events behind loses everything older; see [`Self::recv`].
/// Dropping the subscription unregisters it.
#[derive(Debug)]
pub struct EventSubscription<T> {
    rx: broadcast::Receiver<T>,
    symbol: Option<Symbol>,
}

impl<T: MarketEvent> EventSubscription<T> {
    const fn new(rx: broadcast::Receiver<T>) -> Self {
        Self { rx, symbol: None }
    }

    /// Only deliver events for `symbol`.
    #[must_use]
    pub fn for_symbol(mut self, symbol: impl Into<Symbol>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Receive the next matching event.
    ///
    /// Returns `None` once the hub is gone. If this listener fell behind,
    /// the skipped events are logged and counted, then delivery resumes
    /// with the oldest retained event.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => self.on_lagged(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Receive a matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => self.on_lagged(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, event: &T) -> bool {
        self.symbol
            .as_deref()
            .is_none_or(|wanted| event.symbol() == Some(wanted))
    }

    fn on_lagged(&self, skipped: u64) {
        tracing::warn!(
            channel = T::KIND.as_str(),
            skipped,
            symbol = self.symbol.as_deref(),
            "Listener lagged, events skipped"
        );
        metrics::record_events_lagged(T::KIND, skipped);
    }
}

// =============================================================================
// Tests
// =============================================================================

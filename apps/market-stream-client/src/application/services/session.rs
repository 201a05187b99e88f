//! Session Loop
//!
//! Owns the transport link for one `connect()`..`disconnect()` span: opens
//! links, replays queued operations, dispatches inbound events and retries
//! with backoff until the attempt budget is exhausted.
//!
//! Every transition runs under the core lock and checks the session's
//! cancellation token first, so a `disconnect()` racing with the loop always
//! wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::reconnect::ReconnectPolicy;
use super::requests::{PendingRequests, Waiter};
use crate::application::ports::{HubEvent, HubRequest, StreamTransport, TransportLink};
use crate::domain::price_book::{PriceBook, TradeTape};
use crate::domain::streaming::{
    ConnectionEvent, ConnectionState, CurrentPrice, EventKind, PriceHistory, PricePoint,
    RequestId,
};
use crate::domain::subscription::{MembershipChange, SubscriptionBook};
use crate::infrastructure::broadcast::EventHub;
use crate::infrastructure::metrics;

// =============================================================================
// Shared State
// =============================================================================

/// Mutable client state. Guarded by [`ClientCore::inner`].
#[derive(Debug)]
pub(crate) struct CoreState {
    pub(crate) membership: SubscriptionBook,
    /// Operations issued while no link was attached, in issue order.
    replay: Vec<HubRequest>,
    outbound: Option<mpsc::UnboundedSender<HubRequest>>,
    requests: PendingRequests,
    pub(crate) book: PriceBook,
    pub(crate) tape: TradeTape,
    gave_up: Option<u32>,
}

impl CoreState {
    /// Send `request` on the attached link, or queue it for replay.
    fn dispatch(&mut self, request: HubRequest) {
        if let Some(outbound) = &self.outbound {
            match outbound.send(request) {
                Ok(()) => return,
                Err(mpsc::error::SendError(request)) => {
                    tracing::debug!(symbol = request.symbol(), "Link closed, queueing operation");
                    self.outbound = None;
                    self.enqueue(request);
                }
            }
        } else {
            self.enqueue(request);
        }
    }

    fn enqueue(&mut self, request: HubRequest) {
        match &request {
            HubRequest::JoinGroup { symbol } => {
                let queued = self.replay.iter().any(
                    |r| matches!(r, HubRequest::JoinGroup { symbol: s } if s == symbol),
                );
                if !queued {
                    self.replay.push(request);
                }
            }
            // A leave cancels the still-queued join; the new link never held the group.
            HubRequest::LeaveGroup { symbol } => {
                self.replay.retain(
                    |r| !matches!(r, HubRequest::JoinGroup { symbol: s } if s == symbol),
                );
            }
            HubRequest::RequestCurrentPrice { .. } | HubRequest::RequestPriceHistory { .. } => {
                self.replay.push(request);
            }
        }
    }

    /// Tear down outstanding requests; queued joins survive for the next connect.
    fn abandon_requests(&mut self) {
        self.requests.fail_all();
        self.replay
            .retain(|r| matches!(r, HubRequest::JoinGroup { .. }));
    }

    /// Flush membership and the replay queue onto a fresh link.
    ///
    /// Held groups not already queued go first, sorted by symbol; queued
    /// operations follow in issue order. Each held group is joined once.
    fn replay_onto(&mut self, outbound: &mpsc::UnboundedSender<HubRequest>) -> Option<usize> {
        let desired = self.membership.active_symbols();
        let queued = std::mem::take(&mut self.replay);

        let is_queued_join = |symbol: &str| {
            queued
                .iter()
                .any(|r| matches!(r, HubRequest::JoinGroup { symbol: s } if s == symbol))
        };

        let mut sequence: Vec<HubRequest> = desired
            .iter()
            .filter(|symbol| !is_queued_join(symbol.as_str()))
            .map(|symbol| HubRequest::JoinGroup {
                symbol: symbol.clone(),
            })
            .collect();

        for request in queued {
            let keep = match &request {
                HubRequest::JoinGroup { symbol } => {
                    desired.contains(symbol)
                        && !sequence.iter().any(
                            |r| matches!(r, HubRequest::JoinGroup { symbol: s } if s == symbol),
                        )
                }
                HubRequest::LeaveGroup { .. } => false,
                HubRequest::RequestCurrentPrice { .. } | HubRequest::RequestPriceHistory { .. } => {
                    true
                }
            };
            if keep {
                sequence.push(request);
            }
        }

        let failed_at = sequence
            .iter()
            .position(|request| outbound.send(request.clone()).is_err());
        if let Some(index) = failed_at {
            // Link died mid-replay; keep the unsent tail for the next one.
            self.replay = sequence.split_off(index);
            return None;
        }
        tracing::debug!(operations = sequence.len(), "Replayed queued operations");
        Some(sequence.len())
    }
}

/// State shared by the client handle and its session task.
#[derive(Debug)]
pub(crate) struct ClientCore {
    inner: Mutex<CoreState>,
    pub(crate) events: Arc<EventHub>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ClientCore {
    pub(crate) fn new(events: Arc<EventHub>, series_capacity: usize, tape_capacity: usize) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Mutex::new(CoreState {
                membership: SubscriptionBook::new(),
                replay: Vec::new(),
                outbound: None,
                requests: PendingRequests::default(),
                book: PriceBook::new(series_capacity),
                tape: TradeTape::new(tape_capacity),
                gave_up: None,
            }),
            events,
            state_tx,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn gave_up(&self) -> Option<u32> {
        self.inner.lock().gave_up
    }

    /// Run `f` with the state locked.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        f(&mut self.inner.lock())
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Connection state changed");
            metrics::set_connection_state(state);
        }
    }

    // =========================================================================
    // Client Operations
    // =========================================================================

    pub(crate) fn subscribe(&self, symbol: &str) -> MembershipChange {
        let mut inner = self.inner.lock();
        let change = inner.membership.add(symbol);
        if change.needs_join() {
            inner.dispatch(HubRequest::JoinGroup {
                symbol: symbol.to_string(),
            });
        }
        metrics::set_active_subscriptions(inner.membership.stats().active_symbols);
        change
    }

    pub(crate) fn unsubscribe(&self, symbol: &str) -> MembershipChange {
        let mut inner = self.inner.lock();
        let change = inner.membership.remove(symbol);
        if change.needs_leave() {
            inner.dispatch(HubRequest::LeaveGroup {
                symbol: symbol.to_string(),
            });
            inner.book.forget(symbol);
            inner.tape.forget(symbol);
        }
        metrics::set_active_subscriptions(inner.membership.stats().active_symbols);
        change
    }

    pub(crate) fn request_current_price(
        &self,
        symbol: &str,
        waiter: Option<Waiter<CurrentPrice>>,
    ) -> RequestId {
        let request_id = RequestId::new();
        let mut inner = self.inner.lock();
        inner.requests.track_current_price(symbol, request_id, waiter);
        inner.dispatch(HubRequest::RequestCurrentPrice {
            symbol: symbol.to_string(),
            request_id,
        });
        request_id
    }

    pub(crate) fn request_price_history(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        waiter: Option<Waiter<PriceHistory>>,
    ) -> RequestId {
        let request_id = RequestId::new();
        let mut inner = self.inner.lock();
        if let Some(superseded) = inner
            .requests
            .track_history(symbol, request_id, from, to, waiter)
        {
            tracing::debug!(
                symbol,
                request_id = %request_id,
                superseded = %superseded,
                "History request superseded"
            );
        }
        inner.dispatch(HubRequest::RequestPriceHistory {
            symbol: symbol.to_string(),
            from,
            to,
            request_id,
        });
        request_id
    }

    // =========================================================================
    // Lifecycle Transitions
    // =========================================================================

    pub(crate) fn begin_connect(&self) {
        let mut inner = self.inner.lock();
        inner.gave_up = None;
        self.set_state(ConnectionState::Connecting);
    }

    /// Explicit teardown. The caller cancels the session first.
    pub(crate) fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.outbound = None;
        inner.abandon_requests();
        self.set_state(ConnectionState::Disconnected);
        self.events.send_connection_event(ConnectionEvent::Closed);
    }

    fn attach(
        &self,
        outbound: mpsc::UnboundedSender<HubRequest>,
        cancel: &CancellationToken,
    ) -> Attach {
        let mut inner = self.inner.lock();
        if cancel.is_cancelled() {
            return Attach::Cancelled;
        }

        let Some(replayed) = inner.replay_onto(&outbound) else {
            return Attach::Failed;
        };
        inner.outbound = Some(outbound);
        self.set_state(ConnectionState::Connected);
        metrics::record_replayed(replayed);
        self.events
            .send_connection_event(ConnectionEvent::Connected { replayed });
        tracing::info!(replayed, "Connected to market data hub");
        Attach::Attached
    }

    fn on_lost(&self, cancel: &CancellationToken) {
        let mut inner = self.inner.lock();
        if cancel.is_cancelled() {
            return;
        }
        inner.outbound = None;
        self.events.send_connection_event(ConnectionEvent::Lost);
        tracing::warn!(
            held_groups = inner.membership.stats().active_symbols,
            "Market data hub connection lost"
        );
    }

    fn schedule_retry(&self, attempt: u32, delay: Duration, cancel: &CancellationToken) -> bool {
        let _inner = self.inner.lock();
        if cancel.is_cancelled() {
            return false;
        }
        self.set_state(ConnectionState::Reconnecting);
        self.events
            .send_connection_event(ConnectionEvent::Reconnecting { attempt, delay });
        true
    }

    fn give_up(&self, attempts: u32, last_error: Option<String>, cancel: &CancellationToken) {
        let mut inner = self.inner.lock();
        if cancel.is_cancelled() {
            return;
        }
        inner.outbound = None;
        inner.gave_up = Some(attempts);
        inner.abandon_requests();
        self.set_state(ConnectionState::Disconnected);
        tracing::error!(
            attempts,
            last_error = last_error.as_deref().unwrap_or("none"),
            "Giving up on market data hub"
        );
        self.events
            .send_connection_event(ConnectionEvent::GaveUp {
                attempts,
                last_error,
            });
    }

    // =========================================================================
    // Inbound Dispatch
    // =========================================================================

    fn handle_event(&self, event: HubEvent, cancel: &CancellationToken) {
        let mut inner = self.inner.lock();
        if cancel.is_cancelled() {
            return;
        }

        match event {
            HubEvent::PriceUpdate(update) => {
                metrics::record_event_received(EventKind::PriceUpdate);
                inner.book.apply_tick(&update.symbol, PricePoint::from(&update));
                drop(inner);
                self.events.send_price_update(update);
            }
            HubEvent::MarketUpdate(update) => {
                metrics::record_event_received(EventKind::MarketUpdate);
                inner.book.apply_tick(&update.symbol, PricePoint::from(&update));
                for trade in &update.trades {
                    inner.tape.record(trade);
                }
                drop(inner);
                self.events.send_market_update(update);
            }
            HubEvent::CurrentPrice(reply) => {
                metrics::record_event_received(EventKind::CurrentPrice);
                inner.book.apply_snapshot(&reply.symbol, PricePoint::from(&reply));
                let resolved = inner.requests.resolve_current_price(&reply);
                drop(inner);
                tracing::debug!(symbol = %reply.symbol, resolved, "Current price received");
                self.events.send_current_price(reply);
            }
            HubEvent::PriceHistory(reply) => {
                metrics::record_event_received(EventKind::PriceHistory);
                let outcome = inner.book.merge_history(&reply.symbol, &reply.history);
                if outcome.is_stale() {
                    tracing::info!(symbol = %reply.symbol, ?outcome, "Merged stale price history");
                    metrics::record_stale_history();
                }
                let resolved = inner.requests.resolve_history(&reply);
                drop(inner);
                tracing::debug!(
                    symbol = %reply.symbol,
                    points = reply.history.len(),
                    resolved,
                    "Price history received"
                );
                self.events.send_price_history(reply);
            }
            HubEvent::Trade(trade) => {
                metrics::record_event_received(EventKind::Trade);
                inner.tape.record(&trade);
                drop(inner);
                self.events.send_trade(trade);
            }
            HubEvent::Completion {
                invocation_id,
                error,
            } => match RequestId::parse(&invocation_id) {
                Some(request_id) => {
                    if let Some(reason) = &error {
                        tracing::warn!(request_id = %request_id, reason = %reason, "Hub rejected request");
                    }
                    inner.requests.complete(request_id, error);
                }
                None => {
                    tracing::debug!(invocation_id = %invocation_id, "Completion for unknown invocation");
                }
            },
        }
    }
}

enum Attach {
    Attached,
    Failed,
    Cancelled,
}

enum Drive {
    Lost(String),
    Cancelled,
}

// =============================================================================
// Session Task
// =============================================================================

/// Handle of a running session task.
#[derive(Debug)]
pub(crate) struct SessionHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) task: tokio::task::JoinHandle<()>,
}

/// Run the session until cancelled or the attempt budget is exhausted.
pub(crate) async fn run(
    core: Arc<ClientCore>,
    transport: Arc<dyn StreamTransport>,
    mut policy: ReconnectPolicy,
    cancel: CancellationToken,
) {
    let mut last_error: Option<String> = None;

    loop {
        let opened = tokio::select! {
            () = cancel.cancelled() => return,
            opened = transport.open() => opened,
        };

        match opened {
            Ok(link) => {
                policy.reset();
                match drive(&core, link, &cancel).await {
                    Drive::Cancelled => return,
                    Drive::Lost(reason) => {
                        core.on_lost(&cancel);
                        last_error = Some(reason);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt = policy.attempt_count(), "Failed to open hub link");
                last_error = Some(e.to_string());
            }
        }

        let Some(delay) = policy.next_delay() else {
            core.give_up(policy.attempt_count(), last_error, &cancel);
            return;
        };

        let attempt = policy.attempt_count();
        if !core.schedule_retry(attempt, delay, &cancel) {
            return;
        }
        metrics::record_reconnect();
        tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting to market data hub");

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

async fn drive(core: &ClientCore, link: TransportLink, cancel: &CancellationToken) -> Drive {
    let TransportLink {
        outbound,
        mut inbound,
    } = link;

    match core.attach(outbound, cancel) {
        Attach::Attached => {}
        Attach::Failed => return Drive::Lost("link closed during replay".to_string()),
        Attach::Cancelled => return Drive::Cancelled,
    }

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Drive::Cancelled,
            event = inbound.recv() => match event {
                Some(event) => core.handle_event(event, cancel),
                None => return Drive::Lost("link closed".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::streaming::PriceUpdate;

    fn core() -> ClientCore {
        ClientCore::new(Arc::new(EventHub::with_defaults()), 100, 1000)
    }

    fn join(symbol: &str) -> HubRequest {
        HubRequest::JoinGroup {
            symbol: symbol.to_string(),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<HubRequest>) -> Vec<HubRequest> {
        let mut sent = Vec::new();
        while let Ok(request) = rx.try_recv() {
            sent.push(request);
        }
        sent
    }

    #[test]
    fn operations_queue_while_detached() {
        let core = core();
        core.subscribe("TSLA");
        core.subscribe("GOOGL");

        core.with_state(|state| {
            assert_eq!(state.replay, vec![join("TSLA"), join("GOOGL")]);
        });
    }

    #[test]
    fn queued_leave_cancels_queued_join() {
        let core = core();
        core.subscribe("TSLA");
        core.subscribe("GOOGL");
        core.unsubscribe("TSLA");

        core.with_state(|state| assert_eq!(state.replay, vec![join("GOOGL")]));
    }

    #[test]
    fn replay_keeps_issue_order_and_joins_once() {
        let core = core();
        let cancel = CancellationToken::new();
        core.subscribe("TSLA");
        core.request_current_price("TSLA", None);
        core.subscribe("GOOGL");

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(matches!(core.attach(tx, &cancel), Attach::Attached));

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], join("TSLA"));
        assert!(matches!(sent[1], HubRequest::RequestCurrentPrice { .. }));
        assert_eq!(sent[2], join("GOOGL"));
        assert_eq!(core.state(), ConnectionState::Connected);
    }

    #[test]
    fn held_groups_rejoin_after_loss() {
        let core = core();
        let cancel = CancellationToken::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        core.attach(tx, &cancel);
        core.subscribe("TSLA");
        core.subscribe("GOOGL");
        assert_eq!(drain(&mut rx).len(), 2);

        core.on_lost(&cancel);
        core.request_current_price("AAPL", None);

        let (tx, mut rx) = mpsc::unbounded_channel();
        core.attach(tx, &cancel);
        let sent = drain(&mut rx);
        assert_eq!(sent[0], join("GOOGL"));
        assert_eq!(sent[1], join("TSLA"));
        assert!(matches!(sent[2], HubRequest::RequestCurrentPrice { .. }));
        assert_eq!(sent.len(), 3);
    }

    #[test]
    fn cancelled_attach_is_refused() {
        let core = core();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(core.attach(tx, &cancel), Attach::Cancelled));
        assert_eq!(core.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn closed_link_requeues_operation() {
        let core = core();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        core.attach(tx, &cancel);
        drop(rx);

        core.subscribe("TSLA");

        core.with_state(|state| {
            assert!(state.outbound.is_none());
            assert_eq!(state.replay, vec![join("TSLA")]);
        });
    }

    #[test]
    fn price_update_feeds_book_and_listeners() {
        let core = core();
        let cancel = CancellationToken::new();
        let mut listener = core.events.price_updates();

        core.handle_event(
            HubEvent::PriceUpdate(PriceUpdate {
                symbol: "TSLA".to_string(),
                price: dec!(810),
                timestamp: Utc::now(),
            }),
            &cancel,
        );

        assert_eq!(listener.try_recv().unwrap().price, dec!(810));
        core.with_state(|state| {
            assert_eq!(state.book.latest("TSLA").unwrap().price, dec!(810));
        });
    }

    #[test]
    fn give_up_records_attempts() {
        let core = core();
        let cancel = CancellationToken::new();
        let mut events = core.events.connection_events();

        core.give_up(5, Some("refused".to_string()), &cancel);

        assert_eq!(core.gave_up(), Some(5));
        assert_eq!(core.state(), ConnectionState::Disconnected);
        assert_eq!(
            events.try_recv(),
            Some(ConnectionEvent::GaveUp {
                attempts: 5,
                last_error: Some("refused".to_string()),
            })
        );
    }

    #[test]
    fn give_up_drops_queued_requests_but_keeps_joins() {
        let core = core();
        let cancel = CancellationToken::new();
        core.subscribe("TSLA");
        core.request_current_price("TSLA", None);
        core.request_price_history("TSLA", Utc::now(), Utc::now(), None);

        core.give_up(5, None, &cancel);

        core.with_state(|state| {
            assert_eq!(state.replay, vec![join("TSLA")]);
            assert_eq!(state.requests.outstanding(), 0);
        });

        core.begin_connect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(matches!(core.attach(tx, &cancel), Attach::Attached));
        assert_eq!(drain(&mut rx), vec![join("TSLA")]);
    }
}

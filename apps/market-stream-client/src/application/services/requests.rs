//! Request correlation.
//!
//! Replies to current-price and history requests arrive on the push channels
//! without a correlation token, so waiters are keyed by symbol. History is
//! single-flight per symbol: a newer request replaces the tracked id and
//! range, and earlier waiters are kept so they resolve with the next reply.
//! Invocation ids are remembered only to route server completion errors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::market_client::ClientError;
use crate::domain::streaming::{CurrentPrice, PriceHistory, ReplyKind, RequestId, Symbol};

/// Reply slot of an awaiting caller.
pub type Waiter<T> = oneshot::Sender<Result<T, ClientError>>;

/// History request currently tracked for a symbol.
#[derive(Debug)]
struct InFlightHistory {
    request_id: RequestId,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    waiters: Vec<Waiter<PriceHistory>>,
}

/// Pending requests and their waiters.
#[derive(Debug, Default)]
pub struct PendingRequests {
    current_price: HashMap<Symbol, Vec<Waiter<CurrentPrice>>>,
    history: HashMap<Symbol, InFlightHistory>,
    invocations: HashMap<RequestId, (Symbol, ReplyKind)>,
}

impl PendingRequests {
    /// Track a current-price request.
    pub fn track_current_price(
        &mut self,
        symbol: &str,
        request_id: RequestId,
        waiter: Option<Waiter<CurrentPrice>>,
    ) {
        self.invocations
            .insert(request_id, (symbol.to_string(), ReplyKind::CurrentPrice));

        self.current_price
            .entry(symbol.to_string())
            .or_default()
            .extend(waiter);
        self.prune();
    }

    /// Track a history request. Returns the id it superseded, if any.
    pub fn track_history(
        &mut self,
        symbol: &str,
        request_id: RequestId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        waiter: Option<Waiter<PriceHistory>>,
    ) -> Option<RequestId> {
        self.invocations
            .insert(request_id, (symbol.to_string(), ReplyKind::PriceHistory));

        match self.history.get_mut(symbol) {
            Some(in_flight) => {
                let previous = in_flight.request_id;
                in_flight.request_id = request_id;
                in_flight.from = from;
                in_flight.to = to;
                in_flight.waiters.extend(waiter);
                self.prune();
                Some(previous)
            }
            None => {
                self.history.insert(
                    symbol.to_string(),
                    InFlightHistory {
                        request_id,
                        from,
                        to,
                        waiters: waiter.into_iter().collect(),
                    },
                );
                self.prune();
                None
            }
        }
    }

    /// Tracked history request for `symbol`: id and window.
    #[must_use]
    pub fn in_flight_history(
        &self,
        symbol: &str,
    ) -> Option<(RequestId, DateTime<Utc>, DateTime<Utc>)> {
        self.history
            .get(symbol)
            .map(|h| (h.request_id, h.from, h.to))
    }

    /// Resolve current-price waiters for the reply's symbol.
    ///
    /// Returns the number of waiters notified.
    pub fn resolve_current_price(&mut self, reply: &CurrentPrice) -> usize {
        self.forget_invocations(&reply.symbol, ReplyKind::CurrentPrice);
        let Some(waiters) = self.current_price.remove(&reply.symbol) else {
            return 0;
        };

        waiters
            .into_iter()
            .filter(|waiter| !waiter.is_closed())
            .map(|waiter| waiter.send(Ok(reply.clone())))
            .filter(Result::is_ok)
            .count()
    }

    /// Resolve the in-flight history request for the reply's symbol.
    ///
    /// Returns the number of waiters notified.
    pub fn resolve_history(&mut self, reply: &PriceHistory) -> usize {
        self.forget_invocations(&reply.symbol, ReplyKind::PriceHistory);
        let Some(in_flight) = self.history.remove(&reply.symbol) else {
            return 0;
        };

        in_flight
            .waiters
            .into_iter()
            .filter(|waiter| !waiter.is_closed())
            .map(|waiter| waiter.send(Ok(reply.clone())))
            .filter(Result::is_ok)
            .count()
    }

    /// Handle a completion for `invocation_id`.
    ///
    /// The id is forgotten either way. A completion error fails the waiters
    /// of the matching request; a rejected history id that was already
    /// superseded is ignored, since the newer request may still succeed.
    /// A plain acknowledgement keeps live waiters for the push reply.
    pub fn complete(&mut self, invocation_id: RequestId, error: Option<String>) {
        let tracked = self.invocations.remove(&invocation_id);
        if let (Some((symbol, kind)), Some(reason)) = (tracked, error) {
            self.reject(invocation_id, &symbol, kind, &reason);
        }
        self.prune();
    }

    fn reject(&mut self, invocation_id: RequestId, symbol: &str, kind: ReplyKind, reason: &str) {
        fn send_rejection<T>(waiters: Vec<Waiter<T>>, symbol: &str, kind: ReplyKind, reason: &str) {
            for waiter in waiters {
                let _ = waiter.send(Err(ClientError::Rejected {
                    symbol: symbol.to_string(),
                    kind,
                    reason: reason.to_string(),
                }));
            }
        }

        match kind {
            ReplyKind::CurrentPrice => send_rejection(
                self.current_price.remove(symbol).unwrap_or_default(),
                symbol,
                kind,
                reason,
            ),
            ReplyKind::PriceHistory => {
                let is_current = self
                    .history
                    .get(symbol)
                    .is_some_and(|h| h.request_id == invocation_id);
                if !is_current {
                    return;
                }
                send_rejection(
                    self.history
                        .remove(symbol)
                        .map(|h| h.waiters)
                        .unwrap_or_default(),
                    symbol,
                    kind,
                    reason,
                );
            }
        }
    }

    /// Fail every waiter with `Disconnected` and forget all requests.
    pub fn fail_all(&mut self) {
        for waiter in self.current_price.drain().flat_map(|(_, w)| w) {
            let _ = waiter.send(Err(ClientError::Disconnected));
        }
        for waiter in self.history.drain().flat_map(|(_, h)| h.waiters) {
            let _ = waiter.send(Err(ClientError::Disconnected));
        }
        self.invocations.clear();
    }

    /// Number of symbols with outstanding requests.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.current_price.values().filter(|w| !w.is_empty()).count() + self.history.len()
    }

    /// Number of invocation ids kept for routing completion errors.
    #[must_use]
    pub fn tracked_invocations(&self) -> usize {
        self.invocations.len()
    }

    /// Drop state nobody can observe any more.
    ///
    /// Timed-out callers close their waiters. A history entry survives while
    /// it has live waiters or its request is still unacknowledged; an
    /// invocation id survives while the request it belongs to is tracked.
    fn prune(&mut self) {
        self.current_price.retain(|_, waiters| {
            waiters.retain(|w| !w.is_closed());
            !waiters.is_empty()
        });

        let invocations = &self.invocations;
        self.history.retain(|_, in_flight| {
            in_flight.waiters.retain(|w| !w.is_closed());
            !in_flight.waiters.is_empty() || invocations.contains_key(&in_flight.request_id)
        });

        let (current_price, history) = (&self.current_price, &self.history);
        self.invocations.retain(|id, (symbol, kind)| match kind {
            ReplyKind::CurrentPrice => current_price.contains_key(symbol.as_str()),
            ReplyKind::PriceHistory => history
                .get(symbol.as_str())
                .is_some_and(|h| h.request_id == *id),
        });
    }

    fn forget_invocations(&mut self, symbol: &str, kind: ReplyKind) {
        self.invocations
            .retain(|_, (s, k)| !(s.as_str() == symbol && *k == kind));
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;
    use crate::domain::streaming::PricePoint;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn current(symbol: &str) -> CurrentPrice {
        CurrentPrice {
            symbol: symbol.to_string(),
            price: dec!(810),
            timestamp: now(),
        }
    }

    fn history(symbol: &str) -> PriceHistory {
        PriceHistory {
            symbol: symbol.to_string(),
            history: vec![PricePoint::new(now(), dec!(800))],
        }
    }

    #[tokio::test]
    async fn current_price_resolves_all_waiters_for_symbol() {
        let mut pending = PendingRequests::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.track_current_price("TSLA", RequestId::new(), Some(tx1));
        pending.track_current_price("TSLA", RequestId::new(), Some(tx2));

        assert_eq!(pending.resolve_current_price(&current("TSLA")), 2);
        assert_eq!(rx1.await.unwrap().unwrap().price, dec!(810));
        assert_eq!(rx2.await.unwrap().unwrap().price, dec!(810));
        assert_eq!(pending.outstanding(), 0);
    }

    #[test]
    fn reply_for_other_symbol_ignored() {
        let mut pending = PendingRequests::default();
        let (tx, rx) = oneshot::channel();
        let mut rx = task::spawn(rx);
        pending.track_current_price("TSLA", RequestId::new(), Some(tx));

        assert_eq!(pending.resolve_current_price(&current("GOOGL")), 0);
        assert_pending!(rx.poll());

        assert_eq!(pending.resolve_current_price(&current("TSLA")), 1);
        assert!(rx.is_woken());
        let reply = assert_ready!(rx.poll());
        assert_eq!(reply.unwrap().unwrap().symbol, "TSLA");
    }

    #[test]
    fn history_single_flight_supersedes() {
        let mut pending = PendingRequests::default();
        let first = RequestId::new();
        let second = RequestId::new();

        assert!(pending.track_history("TSLA", first, now(), now(), None).is_none());
        assert_eq!(
            pending.track_history("TSLA", second, now(), now(), None),
            Some(first)
        );
        assert_eq!(pending.in_flight_history("TSLA").unwrap().0, second);
    }

    #[tokio::test]
    async fn superseded_history_waiters_still_resolve() {
        let mut pending = PendingRequests::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.track_history("TSLA", RequestId::new(), now(), now(), Some(tx1));
        pending.track_history("TSLA", RequestId::new(), now(), now(), Some(tx2));

        assert_eq!(pending.resolve_history(&history("TSLA")), 2);
        assert!(rx1.await.unwrap().is_ok());
        assert!(rx2.await.unwrap().is_ok());
        assert!(pending.in_flight_history("TSLA").is_none());
    }

    #[tokio::test]
    async fn completion_error_rejects_waiters() {
        let mut pending = PendingRequests::default();
        let id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        pending.track_current_price("TSLA", id, Some(tx));

        pending.complete(id, Some("unknown symbol".to_string()));

        match rx.await.unwrap() {
            Err(ClientError::Rejected { symbol, reason, .. }) => {
                assert_eq!(symbol, "TSLA");
                assert_eq!(reason, "unknown symbol");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn completion_error_for_superseded_history_ignored() {
        let mut pending = PendingRequests::default();
        let first = RequestId::new();
        let (tx, mut rx) = oneshot::channel();
        pending.track_history("TSLA", first, now(), now(), Some(tx));
        pending.track_history("TSLA", RequestId::new(), now(), now(), None);

        pending.complete(first, Some("boom".to_string()));

        assert!(rx.try_recv().is_err());
        assert!(pending.in_flight_history("TSLA").is_some());
    }

    #[test]
    fn successful_completion_keeps_waiters() {
        let mut pending = PendingRequests::default();
        let id = RequestId::new();
        let (tx, _rx) = oneshot::channel();
        pending.track_current_price("TSLA", id, Some(tx));

        pending.complete(id, None);

        assert_eq!(pending.outstanding(), 1);
        assert_eq!(pending.tracked_invocations(), 0);
    }

    #[test]
    fn acknowledged_requests_leave_nothing_behind() {
        let mut pending = PendingRequests::default();
        for _ in 0..1000 {
            let id = RequestId::new();
            pending.track_current_price("TSLA", id, None);
            pending.complete(id, None);
        }
        for _ in 0..1000 {
            let id = RequestId::new();
            pending.track_history("GOOGL", id, now(), now(), None);
            pending.complete(id, None);
        }

        assert_eq!(pending.tracked_invocations(), 0);
        assert_eq!(pending.outstanding(), 0);
        assert!(pending.in_flight_history("GOOGL").is_none());
    }

    #[test]
    fn timed_out_waiters_are_dropped_on_acknowledgement() {
        let mut pending = PendingRequests::default();
        let price_id = RequestId::new();
        let history_id = RequestId::new();
        let (price_tx, price_rx) = oneshot::channel();
        let (history_tx, history_rx) = oneshot::channel();
        pending.track_current_price("TSLA", price_id, Some(price_tx));
        pending.track_history("TSLA", history_id, now(), now(), Some(history_tx));

        drop(price_rx);
        drop(history_rx);
        pending.complete(price_id, None);
        assert_eq!(pending.outstanding(), 1);

        pending.complete(history_id, None);
        assert_eq!(pending.outstanding(), 0);
        assert_eq!(pending.tracked_invocations(), 0);
    }

    #[test]
    fn unacknowledged_history_stays_in_flight() {
        let mut pending = PendingRequests::default();
        let id = RequestId::new();
        pending.track_history("TSLA", id, now(), now(), None);

        assert_eq!(pending.in_flight_history("TSLA").unwrap().0, id);
        assert_eq!(pending.tracked_invocations(), 1);
    }

    #[tokio::test]
    async fn fail_all_disconnects_waiters() {
        let mut pending = PendingRequests::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.track_current_price("TSLA", RequestId::new(), Some(tx1));
        pending.track_history("GOOGL", RequestId::new(), now(), now(), Some(tx2));

        pending.fail_all();

        assert!(matches!(rx1.await.unwrap(), Err(ClientError::Disconnected)));
        assert!(matches!(rx2.await.unwrap(), Err(ClientError::Disconnected)));
        assert_eq!(pending.outstanding(), 0);
    }
}

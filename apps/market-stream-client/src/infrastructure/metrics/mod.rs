//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: Counts of hub events received and skipped by lagging listeners
//! - **Connection**: Connection state and reconnection attempts
//! - **Subscriptions**: Active group memberships
//! - **Requests**: Correlated request timeouts and stale history replies
//! - **Orders**: Orders submitted and failed
//!
//! # Integration
//!
//! When a port is configured, metrics are served at `/metrics` by the
//! exporter's own HTTP listener. Without a recorder installed every
//! recording function is a no-op.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::streaming::{ConnectionState, EventKind, ReplyKind};

// =============================================================================
// Exporter
// =============================================================================

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus exporter listening on `port`.
///
/// Port 0 leaves metrics disabled. Returns the listen address when the
/// exporter is running.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<Option<SocketAddr>, BuildError> {
    if port == 0 {
        return Ok(None);
    }
    if let Some(addr) = INSTALLED.get() {
        return Ok(Some(*addr));
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    let _ = INSTALLED.set(addr);
    Ok(Some(addr))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_stream_events_received_total",
        "Total hub events received by kind"
    );
    describe_counter!(
        "market_stream_events_lagged_total",
        "Total events skipped by lagging listeners"
    );
    describe_counter!(
        "market_stream_frame_errors_total",
        "Total hub frames that could not be decoded"
    );

    describe_gauge!(
        "market_stream_connection_state",
        "Connection state (0 disconnected, 1 connecting, 2 connected, 3 reconnecting)"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Total reconnection attempts"
    );
    describe_counter!(
        "market_stream_replayed_operations_total",
        "Total queued operations replayed after connecting"
    );

    describe_gauge!(
        "market_stream_active_subscriptions",
        "Number of symbols with at least one holder"
    );

    describe_counter!(
        "market_stream_request_timeouts_total",
        "Total correlated requests that timed out"
    );
    describe_counter!(
        "market_stream_stale_history_total",
        "Total history replies older than the newest live tick"
    );

    describe_counter!(
        "market_stream_orders_submitted_total",
        "Total orders accepted by the backend"
    );
    describe_counter!(
        "market_stream_orders_failed_total",
        "Total orders in failed submissions"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Reconnecting => 3.0,
    }
}

/// Record an event received from the hub.
pub fn record_event_received(kind: EventKind) {
    counter!(
        "market_stream_events_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record events skipped by a lagging listener.
pub fn record_events_lagged(kind: EventKind, count: u64) {
    counter!(
        "market_stream_events_lagged_total",
        "kind" => kind.as_str()
    )
    .increment(count);
}

/// Record a frame that could not be decoded.
pub fn record_frame_error(error_type: &'static str) {
    counter!(
        "market_stream_frame_errors_total",
        "error_type" => error_type
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("market_stream_connection_state").set(state_value(state));
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("market_stream_reconnects_total").increment(1);
}

/// Record operations replayed after connecting.
pub fn record_replayed(count: usize) {
    counter!("market_stream_replayed_operations_total").increment(count as u64);
}

/// Update the active subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(count: usize) {
    gauge!("market_stream_active_subscriptions").set(count as f64);
}

/// Record a request timeout.
pub fn record_request_timeout(kind: ReplyKind) {
    counter!(
        "market_stream_request_timeouts_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a stale history reply.
pub fn record_stale_history() {
    counter!("market_stream_stale_history_total").increment(1);
}

/// Record the outcome of an order submission.
pub fn record_orders(success: bool, count: usize) {
    let name = if success {
        "market_stream_orders_submitted_total"
    } else {
        "market_stream_orders_failed_total"
    };
    counter!(name).increment(count as u64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_values_distinct() {
        let values = [
            state_value(ConnectionState::Disconnected),
            state_value(ConnectionState::Connecting),
            state_value(ConnectionState::Connected),
            state_value(ConnectionState::Reconnecting),
        ];
        for (i, a) in values.iter().enumerate() {
            for b in &values[i + 1..] {
                assert!((a - b).abs() > f64::EPSILON);
            }
        }
    }

    #[test]
    fn disabled_without_port() {
        assert!(init_metrics(0).unwrap().is_none());
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_event_received(EventKind::PriceUpdate);
        record_events_lagged(EventKind::Trade, 3);
        record_request_timeout(ReplyKind::PriceHistory);
        set_connection_state(ConnectionState::Connected);
        set_active_subscriptions(2);
        record_orders(true, 2);
    }
}

//! Shared fixtures: an in-memory hub transport driven by the test.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use market_stream_client::{
    EventSubscription, HubEvent, HubRequest, MarketEvent, StreamSettings, StreamTransport,
    TransportError, TransportLink,
};

/// How long a test waits for anything before failing.
pub const WAIT: Duration = Duration::from_secs(2);

/// Outcome of one `open()` call.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Refuse,
    Accept,
}

/// Server side of an accepted link.
pub struct ServerEnd {
    pub requests: mpsc::UnboundedReceiver<HubRequest>,
    pub events: mpsc::Sender<HubEvent>,
}

impl ServerEnd {
    pub async fn next_request(&mut self) -> HubRequest {
        tokio::time::timeout(WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("client dropped the link")
    }

    /// Requests already sent, without waiting.
    pub fn drain_requests(&mut self) -> Vec<HubRequest> {
        let mut sent = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            sent.push(request);
        }
        sent
    }

    pub async fn push(&self, event: HubEvent) {
        self.events.send(event).await.expect("client dropped the link");
    }

    /// Simulate a transport loss.
    pub fn drop_link(self) {
        drop(self);
    }
}

/// Transport whose `open()` outcomes follow a script. Once the script runs
/// out every further attempt is refused.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    links: mpsc::UnboundedSender<ServerEnd>,
    opens: AtomicU32,
}

impl ScriptedTransport {
    pub fn new(
        steps: impl IntoIterator<Item = Step>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (links, links_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            links,
            opens: AtomicU32::new(0),
        });
        (transport, links_rx)
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open(&self) -> Result<TransportLink, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(Step::Refuse);

        match step {
            Step::Refuse => Err(TransportError::ConnectionFailed("refused".to_string())),
            Step::Accept => {
                let (outbound, requests) = mpsc::unbounded_channel();
                let (events, inbound) = mpsc::channel(64);
                let _ = self.links.send(ServerEnd { requests, events });
                Ok(TransportLink { outbound, inbound })
            }
        }
    }
}

/// Settings with millisecond backoff and no jitter.
pub fn fast_settings(max_attempts: u32) -> StreamSettings {
    StreamSettings {
        reconnect_delay_initial: Duration::from_millis(10),
        reconnect_delay_max: Duration::from_millis(50),
        reconnect_jitter: 0.0,
        max_reconnect_attempts: max_attempts,
        ..StreamSettings::default()
    }
}

pub async fn next_link(links: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    tokio::time::timeout(WAIT, links.recv())
        .await
        .expect("timed out waiting for a link")
        .expect("transport dropped")
}

/// Receive the next event on `listener` or fail the test.
pub async fn recv<T: MarketEvent>(listener: &mut EventSubscription<T>) -> T {
    tokio::time::timeout(WAIT, listener.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event hub closed")
}

/// Receive events until one matches `wanted`.
pub async fn recv_until<T: MarketEvent>(
    listener: &mut EventSubscription<T>,
    wanted: impl Fn(&T) -> bool,
) -> T {
    loop {
        let event = recv(listener).await;
        if wanted(&event) {
            return event;
        }
    }
}

pub fn join(symbol: &str) -> HubRequest {
    HubRequest::JoinGroup {
        symbol: symbol.to_string(),
    }
}

pub fn leave(symbol: &str) -> HubRequest {
    HubRequest::LeaveGroup {
        symbol: symbol.to_string(),
    }
}

/// 2024-05-01 12:00:00 UTC plus `offset_secs`.
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
}

pub fn price(value: i64) -> Decimal {
    Decimal::from(value)
}

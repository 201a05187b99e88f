//! Hub Keep-Alive
//!
//! The hub expects a ping frame whenever the client has been quiet for the
//! keep-alive interval, and the client treats a server that has been quiet
//! for the server timeout as gone. [`LinkActivity`] is touched by the link
//! pump on every frame; a small monitor task turns idle times into
//! [`KeepAliveSignal`]s.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lower bound on the monitor's polling period.
const MIN_POLL_PERIOD: Duration = Duration::from_millis(10);

/// Keep-alive timings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// Outbound silence after which a ping is sent.
    pub ping_interval: Duration,
    /// Inbound silence after which the link is considered lost.
    pub server_timeout: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
        }
    }
}

impl KeepAliveConfig {
    /// Create a configuration with custom timings.
    #[must_use]
    pub const fn new(ping_interval: Duration, server_timeout: Duration) -> Self {
        Self {
            ping_interval,
            server_timeout,
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &crate::StreamSettings) -> Self {
        Self::new(settings.keepalive_interval, settings.server_timeout)
    }

    /// What the link should do after the given idle times, if anything.
    ///
    /// Server silence takes precedence over a due ping.
    #[must_use]
    pub fn assess(&self, inbound_idle: Duration, outbound_idle: Duration) -> Option<KeepAliveSignal> {
        if inbound_idle > self.server_timeout {
            Some(KeepAliveSignal::ServerSilent(inbound_idle))
        } else if outbound_idle >= self.ping_interval {
            Some(KeepAliveSignal::Ping)
        } else {
            None
        }
    }

    fn poll_period(&self) -> Duration {
        self.ping_interval
            .min(self.server_timeout / 2)
            .max(MIN_POLL_PERIOD)
    }
}

/// Action requested by the keep-alive monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveSignal {
    /// Send a ping frame.
    Ping,
    /// Nothing received for this long; drop the link.
    ServerSilent(Duration),
}

/// Last inbound and outbound activity on one link.
#[derive(Debug)]
pub struct LinkActivity {
    inbound: Mutex<Instant>,
    outbound: Mutex<Instant>,
}

impl Default for LinkActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkActivity {
    /// Both directions counted as active now.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            inbound: Mutex::new(now),
            outbound: Mutex::new(now),
        }
    }

    /// A frame arrived from the hub.
    pub fn touch_inbound(&self) {
        *self.inbound.lock() = Instant::now();
    }

    /// A frame was written to the hub.
    pub fn touch_outbound(&self) {
        *self.outbound.lock() = Instant::now();
    }

    /// Time since the hub last sent anything.
    #[must_use]
    pub fn inbound_idle(&self) -> Duration {
        self.inbound.lock().elapsed()
    }

    /// Time since the client last sent anything.
    #[must_use]
    pub fn outbound_idle(&self) -> Duration {
        self.outbound.lock().elapsed()
    }
}

/// Spawn the monitor for one link.
///
/// The returned channel yields a signal whenever one is due. After
/// [`KeepAliveSignal::ServerSilent`] the monitor stops and the channel closes;
/// it also stops when `cancel` fires or the receiver is dropped.
pub fn spawn_monitor(
    config: KeepAliveConfig,
    activity: Arc<LinkActivity>,
    cancel: CancellationToken,
) -> mpsc::Receiver<KeepAliveSignal> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(monitor(config, activity, tx, cancel));
    rx
}

async fn monitor(
    config: KeepAliveConfig,
    activity: Arc<LinkActivity>,
    tx: mpsc::Sender<KeepAliveSignal>,
    cancel: CancellationToken,
) {
    let period = config.poll_period();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(signal) = config.assess(activity.inbound_idle(), activity.outbound_idle()) else {
            continue;
        };

        if let KeepAliveSignal::ServerSilent(idle) = signal {
            tracing::warn!(
                idle_ms = idle.as_millis(),
                timeout_ms = config.server_timeout.as_millis(),
                "Hub silent past server timeout"
            );
        }

        let last = matches!(signal, KeepAliveSignal::ServerSilent(_));
        if tx.send(signal).await.is_err() || last {
            return;
        }
    }
}

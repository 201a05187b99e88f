//! Local Market State
//!
//! Per-symbol price series and trade tapes reconciled from push events.
//!
//! Live ticks and history replies are merged by timestamp. The latest price
//! is always the point with the greatest timestamp, so a history reply that
//! arrives after newer live ticks cannot roll the visible price back.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::domain::streaming::{PricePoint, Symbol, TradeMessage};

/// Default number of points kept per symbol.
pub const DEFAULT_SERIES_CAPACITY: usize = 100;

/// Default number of trades kept per symbol.
pub const DEFAULT_TRADE_TAPE_CAPACITY: usize = 1000;

/// Minimum number of recent trade IDs remembered per symbol for dedupe.
pub const MIN_TRADE_DEDUPE_WINDOW: usize = 4096;

// =============================================================================
// Outcomes
// =============================================================================

/// Result of applying a single point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The point was inserted or replaced an older value at the same time.
    Applied,
    /// An identical point was already present.
    Duplicate,
}

/// Result of merging a history reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// History merged.
    Applied {
        /// Points inserted.
        inserted: usize,
    },
    /// History merged, but its newest point predates the newest live point.
    StaleHistory {
        /// Points inserted.
        inserted: usize,
        /// Newest history timestamp.
        history_latest: DateTime<Utc>,
        /// Newest live timestamp at merge time.
        live_latest: DateTime<Utc>,
    },
    /// The reply carried no points.
    Empty,
}

impl MergeOutcome {
    /// Whether the reply was classified stale.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::StaleHistory { .. })
    }
}

// =============================================================================
// Price Book
// =============================================================================

/// Bounded, timestamp-ordered price series per symbol.
#[derive(Debug)]
pub struct PriceBook {
    capacity: usize,
    series: HashMap<Symbol, Vec<PricePoint>>,
}

impl Default for PriceBook {
    fn default() -> Self {
        Self::new(DEFAULT_SERIES_CAPACITY)
    }
}

impl PriceBook {
    /// Create a book keeping at most `capacity` points per symbol.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: HashMap::new(),
        }
    }

    /// Insert a live tick.
    ///
    /// A tick at an existing timestamp replaces that point's price.
    pub fn apply_tick(&mut self, symbol: &str, point: PricePoint) -> TickOutcome {
        let capacity = self.capacity;
        let series = self.series.entry(symbol.to_string()).or_default();

        let pos = series.partition_point(|p| p.timestamp < point.timestamp);
        let outcome = match series.get_mut(pos) {
            Some(existing) if existing.timestamp == point.timestamp => {
                if existing.price == point.price {
                    TickOutcome::Duplicate
                } else {
                    *existing = point;
                    TickOutcome::Applied
                }
            }
            _ => {
                series.insert(pos, point);
                TickOutcome::Applied
            }
        };

        trim(series, capacity);
        outcome
    }

    /// Insert a current-price snapshot. Same rules as a live tick.
    pub fn apply_snapshot(&mut self, symbol: &str, point: PricePoint) -> TickOutcome {
        self.apply_tick(symbol, point)
    }

    /// Merge a history reply into the series.
    ///
    /// Existing points win on equal timestamps.
    pub fn merge_history(&mut self, symbol: &str, history: &[PricePoint]) -> MergeOutcome {
        let Some(history_latest) = history.iter().map(|p| p.timestamp).max() else {
            return MergeOutcome::Empty;
        };

        let capacity = self.capacity;
        let series = self.series.entry(symbol.to_string()).or_default();
        let live_latest = series.last().map(|p| p.timestamp);

        let mut inserted = 0;
        for point in history {
            let pos = series.partition_point(|p| p.timestamp < point.timestamp);
            if series.get(pos).is_some_and(|p| p.timestamp == point.timestamp) {
                continue;
            }
            series.insert(pos, point.clone());
            inserted += 1;
        }
        trim(series, capacity);

        match live_latest {
            Some(live_latest) if history_latest < live_latest => MergeOutcome::StaleHistory {
                inserted,
                history_latest,
                live_latest,
            },
            _ => MergeOutcome::Applied { inserted },
        }
    }

    /// Point with the greatest timestamp.
    #[must_use]
    pub fn latest(&self, symbol: &str) -> Option<PricePoint> {
        self.series.get(symbol).and_then(|s| s.last().cloned())
    }

    /// Copy of the series, oldest first.
    #[must_use]
    pub fn series(&self, symbol: &str) -> Vec<PricePoint> {
        self.series.get(symbol).cloned().unwrap_or_default()
    }

    /// Drop all state for `symbol`.
    pub fn forget(&mut self, symbol: &str) {
        self.series.remove(symbol);
    }
}

fn trim(series: &mut Vec<PricePoint>, capacity: usize) {
    if series.len() > capacity {
        let excess = series.len() - capacity;
        series.drain(..excess);
    }
}

// =============================================================================
// Trade Tape
// =============================================================================

#[derive(Debug, Default)]
struct SymbolTape {
    trades: VecDeque<TradeMessage>,
    recent: VecDeque<i64>,
    seen: HashSet<i64>,
    /// Highest ID aged out of `seen`; anything at or below it is refused.
    watermark: Option<i64>,
}

impl SymbolTape {
    fn admit(&mut self, trade_id: i64, window: usize) -> bool {
        if self.watermark.is_some_and(|floor| trade_id <= floor) || !self.seen.insert(trade_id) {
            return false;
        }

        self.recent.push_back(trade_id);
        while self.recent.len() > window {
            if let Some(aged) = self.recent.pop_front() {
                self.seen.remove(&aged);
                self.watermark = Some(self.watermark.map_or(aged, |floor| floor.max(aged)));
            }
        }
        true
    }
}

/// Append-only executed trades per symbol, deduplicated by trade ID.
///
/// Dedupe does not depend on the display capacity: IDs are remembered in a
/// separate window, and once an ID ages out of it, that ID and every lower
/// one are refused.
#[derive(Debug)]
pub struct TradeTape {
    capacity: usize,
    dedupe_window: usize,
    tapes: HashMap<Symbol, SymbolTape>,
}

impl Default for TradeTape {
    fn default() -> Self {
        Self::new(DEFAULT_TRADE_TAPE_CAPACITY)
    }
}

impl TradeTape {
    /// Create a tape keeping at most `capacity` trades per symbol.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            dedupe_window: capacity.max(MIN_TRADE_DEDUPE_WINDOW),
            tapes: HashMap::new(),
        }
    }

    /// Record a trade. Returns `false` if its ID was already recorded or is
    /// older than the dedupe window.
    pub fn record(&mut self, trade: &TradeMessage) -> bool {
        let tape = self.tapes.entry(trade.symbol.clone()).or_default();
        if !tape.admit(trade.trade_id, self.dedupe_window) {
            return false;
        }

        tape.trades.push_back(trade.clone());
        while tape.trades.len() > self.capacity {
            tape.trades.pop_front();
        }
        true
    }

    /// Copy of the trades for `symbol`, in arrival order.
    #[must_use]
    pub fn trades(&self, symbol: &str) -> Vec<TradeMessage> {
        self.tapes
            .get(symbol)
            .map(|tape| tape.trades.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all state for `symbol`.
    pub fn forget(&mut self, symbol: &str) {
        self.tapes.remove(symbol);
    }
}

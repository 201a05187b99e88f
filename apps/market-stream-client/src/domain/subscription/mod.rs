//! Subscription Membership
//!
//! Reference-counted group membership per symbol. Any number of local views
//! may subscribe to the same symbol while the hub only sees one group join.
//!
//! # Design
//!
//! The book tracks:
//! - A reference count per symbol
//! - The transitions through zero, which are the only ones that reach the wire
//!
//! A symbol is active while its count is above zero. Removing a symbol that
//! is not active is a no-op, so a leave is never sent twice.

use std::collections::HashMap;

use crate::domain::streaming::Symbol;

// =============================================================================
// Membership Changes
// =============================================================================

/// Effect of a subscribe or unsubscribe call on group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    /// Count went 0→1. The group must be joined.
    Joined,
    /// Count went 1→0. The group must be left.
    Left,
    /// Count changed but stayed above zero.
    Retained {
        /// Holders after the change.
        holders: usize,
    },
    /// Unsubscribe of a symbol that was not active.
    NotSubscribed,
}

impl MembershipChange {
    /// Whether a join must be sent.
    #[must_use]
    pub const fn needs_join(self) -> bool {
        matches!(self, Self::Joined)
    }

    /// Whether a leave must be sent.
    #[must_use]
    pub const fn needs_leave(self) -> bool {
        matches!(self, Self::Left)
    }
}

/// Membership statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of active symbols.
    pub active_symbols: usize,
    /// Sum of holders across symbols.
    pub total_holders: usize,
}

// =============================================================================
// Subscription Book
// =============================================================================

/// Per-symbol reference counts.
#[derive(Debug, Default)]
pub struct SubscriptionBook {
    symbol_refcount: HashMap<Symbol, usize>,
}

impl SubscriptionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one holder for `symbol`.
    pub fn add(&mut self, symbol: &str) -> MembershipChange {
        let refcount = self.symbol_refcount.entry(symbol.to_string()).or_insert(0);
        *refcount += 1;

        if *refcount == 1 {
            MembershipChange::Joined
        } else {
            MembershipChange::Retained { holders: *refcount }
        }
    }

    /// Remove one holder from `symbol`.
    pub fn remove(&mut self, symbol: &str) -> MembershipChange {
        let Some(refcount) = self.symbol_refcount.get_mut(symbol) else {
            return MembershipChange::NotSubscribed;
        };

        *refcount = refcount.saturating_sub(1);
        if *refcount == 0 {
            self.symbol_refcount.remove(symbol);
            MembershipChange::Left
        } else {
            MembershipChange::Retained { holders: *refcount }
        }
    }

    /// Number of holders for `symbol`.
    #[must_use]
    pub fn holders(&self, symbol: &str) -> usize {
        self.symbol_refcount.get(symbol).copied().unwrap_or(0)
    }

    /// Whether `symbol` is active.
    #[must_use]
    pub fn is_active(&self, symbol: &str) -> bool {
        self.symbol_refcount.contains_key(symbol)
    }

    /// Active symbols, sorted.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.symbol_refcount.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Get membership statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            active_symbols: self.symbol_refcount.len(),
            total_holders: self.symbol_refcount.values().sum(),
        }
    }

    /// Whether no symbol is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbol_refcount.is_empty()
    }
}

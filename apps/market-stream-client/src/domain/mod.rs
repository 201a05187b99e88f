//! Domain Layer - Core market data types and state.
//!
//! This layer contains the core domain types for market data streaming
//! and order submission. Nothing here performs I/O.

/// Market data types (securities, ticks, market updates, history).
pub mod streaming;

/// Outbound orders and submission results.
pub mod orders;

/// Reference-counted group membership.
pub mod subscription;

/// Per-symbol price series and trade tapes.
pub mod price_book;

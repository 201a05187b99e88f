//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `StreamingMarketClient`: hub session, membership, fan-out and requests
//! - `OrderService`: order validation and submission
//! - `ReconnectPolicy`: linear backoff with bounded jitter

pub mod market_client;
pub mod orders;
pub mod reconnect;
pub(crate) mod requests;
mod session;

pub use market_client::{ClientError, StreamingMarketClient};
pub use orders::{NO_VALID_ORDERS, OrderService, fallback_securities, securities_or_fallback};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};

//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and the port interfaces
//! the streaming client and order service depend on.

/// Port interfaces for external systems (hub transport, order gateway).
pub mod ports;

/// Application services: streaming client, order placement, reconnect policy.
pub mod services;

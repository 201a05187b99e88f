//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Fan-out channels for inbound events.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// HTTP adapter for the order gateway and securities directory.
pub mod gateway;

/// WebSocket adapter for the market data hub.
pub mod hub;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;

//! Configuration Module
//!
//! Configuration loading for the market stream client.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, DEFAULT_BASE_URL, DEFAULT_HUB_PATH, GatewaySettings,
    StreamSettings,
};

//! Client Configuration Settings
//!
//! Configuration types for the market stream client, loaded from environment
//! variables. Unset or unparsable numeric values fall back to defaults.

use std::time::Duration;

/// Default backend base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5068";

/// Default hub path under the base URL.
pub const DEFAULT_HUB_PATH: &str = "/marketDataHub";

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Reconnection delay step (linear backoff base).
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Jitter as a fraction of the base delay.
    pub reconnect_jitter: f64,
    /// Maximum consecutive reconnection attempts (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Interval between client pings.
    pub keepalive_interval: Duration,
    /// Silence from the server after which the link is considered lost.
    pub server_timeout: Duration,
    /// Time allowed for the hub handshake.
    pub handshake_timeout: Duration,
    /// Points kept per symbol in the price series.
    pub series_capacity: usize,
    /// Trades kept per symbol in the trade tape.
    pub trade_tape_capacity: usize,
    /// Capacity of each event channel.
    pub event_capacity: usize,
    /// Default timeout for awaitable requests.
    pub request_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_jitter: 0.1,
            max_reconnect_attempts: 5,
            keepalive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            series_capacity: 100,
            trade_tape_capacity: 1000,
            event_capacity: 1024,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Order gateway settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// HTTP request timeout.
    pub timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL (`http` or `https`, no trailing slash).
    pub base_url: String,
    /// Hub path under the base URL.
    pub hub_path: String,
    /// Streaming settings.
    pub stream: StreamSettings,
    /// Order gateway settings.
    pub gateway: GatewaySettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            hub_path: DEFAULT_HUB_PATH.to_string(),
            stream: StreamSettings::default(),
            gateway: GatewaySettings::default(),
            metrics_port: 0,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not an `http(s)` URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not an `http(s)` URL.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Lookup(lookup);
        let defaults = StreamSettings::default();

        let base_url = env
            .string("MARKET_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = normalize_base_url(&base_url)?;

        let hub_path = env
            .string("MARKET_HUB_PATH")
            .unwrap_or_else(|| DEFAULT_HUB_PATH.to_string());
        let hub_path = if hub_path.starts_with('/') {
            hub_path
        } else {
            format!("/{hub_path}")
        };

        let stream = StreamSettings {
            reconnect_delay_initial: env.millis(
                "MARKET_STREAM_RECONNECT_DELAY_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.millis(
                "MARKET_STREAM_RECONNECT_DELAY_MAX_MS",
                defaults.reconnect_delay_max,
            ),
            reconnect_jitter: env.fraction("MARKET_STREAM_RECONNECT_JITTER", defaults.reconnect_jitter),
            max_reconnect_attempts: env.parse(
                "MARKET_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            keepalive_interval: env.secs("MARKET_STREAM_KEEPALIVE_SECS", defaults.keepalive_interval),
            server_timeout: env.secs("MARKET_STREAM_SERVER_TIMEOUT_SECS", defaults.server_timeout),
            handshake_timeout: env.secs(
                "MARKET_STREAM_HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout,
            ),
            series_capacity: env.parse("MARKET_STREAM_SERIES_CAPACITY", defaults.series_capacity),
            trade_tape_capacity: env.parse(
                "MARKET_STREAM_TRADE_TAPE_CAPACITY",
                defaults.trade_tape_capacity,
            ),
            event_capacity: env.parse("MARKET_STREAM_EVENT_CAPACITY", defaults.event_capacity),
            request_timeout: env.secs("MARKET_STREAM_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
        };

        let gateway = GatewaySettings {
            timeout: env.secs("ORDER_GATEWAY_TIMEOUT_SECS", GatewaySettings::default().timeout),
        };

        Ok(Self {
            base_url,
            hub_path,
            stream,
            gateway,
            metrics_port: env.parse("MARKET_STREAM_METRICS_PORT", 0),
        })
    }

    /// Base URL of the HTTP API.
    #[must_use]
    pub fn api_base_url(&self) -> &str {
        &self.base_url
    }

    /// WebSocket URL of the market data hub.
    #[must_use]
    pub fn hub_url(&self) -> String {
        let ws_base = self.base_url.strip_prefix("https://").map_or_else(
            || {
                self.base_url
                    .strip_prefix("http://")
                    .map_or_else(|| self.base_url.clone(), |rest| format!("ws://{rest}"))
            },
            |rest| format!("wss://{rest}"),
        );
        format!("{ws_base}{}", self.hub_path)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let has_host = ["http://", "https://"]
        .iter()
        .any(|scheme| trimmed.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty()));

    if has_host {
        Ok(trimmed.to_string())
    } else {
        Err(ConfigError::InvalidValue {
            key: "MARKET_API_BASE_URL".to_string(),
            value: raw.to_string(),
        })
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// A finite value in `[0, 1]`; anything else yields `default`.
    fn fraction(&self, key: &str, default: f64) -> f64 {
        self.string(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && (0.0..=1.0).contains(v))
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.base_url, "http://localhost:5068");
        assert_eq!(config.hub_url(), "ws://localhost:5068/marketDataHub");
        assert_eq!(config.metrics_port, 0);
        assert_eq!(config.stream.max_reconnect_attempts, 5);
        assert_eq!(config.stream.series_capacity, 100);
    }

    #[test]
    fn stream_settings_defaults() {
        let settings = StreamSettings::default();
        assert_eq!(settings.reconnect_delay_initial, Duration::from_millis(1000));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert!((settings.reconnect_jitter - 0.1).abs() < f64::EPSILON);
        assert_eq!(settings.keepalive_interval, Duration::from_secs(15));
        assert_eq!(settings.server_timeout, Duration::from_secs(30));
        assert_eq!(settings.trade_tape_capacity, 1000);
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn variables_override_defaults() {
        let config = config_from(&[
            ("MARKET_API_BASE_URL", "https://trading.example.com/"),
            ("MARKET_HUB_PATH", "hubs/market"),
            ("MARKET_STREAM_RECONNECT_DELAY_MS", "250"),
            ("MARKET_STREAM_MAX_RECONNECT_ATTEMPTS", "0"),
            ("MARKET_STREAM_EVENT_CAPACITY", "16"),
            ("ORDER_GATEWAY_TIMEOUT_SECS", "3"),
            ("MARKET_STREAM_METRICS_PORT", "9464"),
        ])
        .unwrap();

        assert_eq!(config.api_base_url(), "https://trading.example.com");
        assert_eq!(config.hub_url(), "wss://trading.example.com/hubs/market");
        assert_eq!(config.stream.reconnect_delay_initial, Duration::from_millis(250));
        assert_eq!(config.stream.max_reconnect_attempts, 0);
        assert_eq!(config.stream.event_capacity, 16);
        assert_eq!(config.gateway.timeout, Duration::from_secs(3));
        assert_eq!(config.metrics_port, 9464);
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let config = config_from(&[
            ("MARKET_STREAM_KEEPALIVE_SECS", "soon"),
            ("MARKET_STREAM_RECONNECT_JITTER", "lots"),
        ])
        .unwrap();
        assert_eq!(config.stream.keepalive_interval, Duration::from_secs(15));
        assert!((config.stream.reconnect_jitter - 0.1).abs() < f64::EPSILON);
    }

    #[test_case("NaN" ; "not a number")]
    #[test_case("inf" ; "infinite")]
    #[test_case("-0.5" ; "negative")]
    #[test_case("1.5" ; "above one")]
    fn out_of_range_jitter_falls_back(raw: &str) {
        let config = config_from(&[("MARKET_STREAM_RECONNECT_JITTER", raw)]).unwrap();
        assert!((config.stream.reconnect_jitter - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn jitter_within_range_accepted() {
        let config = config_from(&[("MARKET_STREAM_RECONNECT_JITTER", "0.25")]).unwrap();
        assert!((config.stream.reconnect_jitter - 0.25).abs() < f64::EPSILON);
    }

    #[test_case("localhost:5068" ; "missing scheme")]
    #[test_case("ftp://example.com" ; "wrong scheme")]
    #[test_case("http://" ; "missing host")]
    fn invalid_base_url_rejected(raw: &str) {
        let err = config_from(&[("MARKET_API_BASE_URL", raw)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}

//! Market Stream Client Binary
//!
//! Market watch: lists the tradable securities, joins their market groups
//! and logs ticks, market updates, trades and lifecycle events until
//! interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream-client
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_API_BASE_URL`: Backend base URL (default: <http://localhost:5068>)
//! - `MARKET_HUB_PATH`: Hub path (default: /marketDataHub)
//! - `MARKET_STREAM_*`: Reconnect, keep-alive and buffer tuning
//! - `MARKET_STREAM_METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `ORDER_GATEWAY_TIMEOUT_SECS`: HTTP timeout (default: 10)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use market_stream_client::infrastructure::telemetry;
use market_stream_client::{
    ClientConfig, ConnectionEvent, HttpOrderGateway, HubConnectionConfig, StreamingMarketClient,
    WebSocketTransport, init_metrics, securities_or_fallback,
};
use tokio::signal;

/// Window of history requested for each symbol at startup.
const HISTORY_WINDOW_HOURS: i64 = 6;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting market stream client");

    let config = ClientConfig::from_env()?;
    log_config(&config);

    if let Some(addr) = init_metrics(config.metrics_port)? {
        tracing::info!(addr = %addr, "Prometheus metrics listening");
    }

    let gateway = HttpOrderGateway::from_client_config(&config)?;
    let securities = securities_or_fallback(&gateway).await;
    tracing::info!(count = securities.len(), "Securities loaded");

    let transport = WebSocketTransport::new(HubConnectionConfig::from_client_config(&config));
    let client = StreamingMarketClient::new(&config.stream, Arc::new(transport));

    spawn_listeners(&client);

    let to = Utc::now();
    let from = to - ChronoDuration::hours(HISTORY_WINDOW_HOURS);
    for security in securities.iter().filter(|s| s.is_active) {
        client.subscribe(&security.symbol);
        client.request_current_price(&security.symbol);
        client.request_price_history(&security.symbol, from, to);
    }

    client.connect();

    tokio::select! {
        result = client.connected() => match result {
            Ok(()) => tracing::info!("Market watch ready"),
            Err(e) => tracing::error!(error = %e, "Initial connection failed"),
        },
        () = await_shutdown() => {
            client.disconnect();
            return Ok(());
        }
    }

    await_shutdown().await;
    client.disconnect();

    for symbol in client.subscribed_symbols() {
        if let Some(latest) = client.latest_price(&symbol) {
            tracing::info!(symbol = %symbol, price = %latest.price, at = %latest.timestamp, "Last price");
        }
    }

    tracing::info!("Market stream client stopped");
    Ok(())
}

/// Spawn one logging task per event channel.
fn spawn_listeners(client: &StreamingMarketClient) {
    let mut ticks = client.price_updates();
    tokio::spawn(async move {
        while let Some(tick) = ticks.recv().await {
            tracing::info!(symbol = %tick.symbol, price = %tick.price, "Price update");
        }
    });

    let mut updates = client.market_updates();
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            tracing::info!(
                symbol = %update.symbol,
                price = %update.current_price,
                trades = update.trades.len(),
                "Market update"
            );
        }
    });

    let mut trades = client.trades();
    tokio::spawn(async move {
        while let Some(trade) = trades.recv().await {
            tracing::info!(
                symbol = %trade.symbol,
                quantity = trade.quantity,
                price = %trade.price,
                "Trade executed"
            );
        }
    });

    let mut snapshots = client.current_prices();
    tokio::spawn(async move {
        while let Some(snapshot) = snapshots.recv().await {
            tracing::info!(symbol = %snapshot.symbol, price = %snapshot.price, "Current price");
        }
    });

    let mut histories = client.price_histories();
    tokio::spawn(async move {
        while let Some(history) = histories.recv().await {
            tracing::info!(symbol = %history.symbol, points = history.history.len(), "Price history");
        }
    });

    let mut lifecycle = client.connection_events();
    tokio::spawn(async move {
        while let Some(event) = lifecycle.recv().await {
            match event {
                ConnectionEvent::GaveUp {
                    attempts,
                    last_error,
                } => tracing::error!(
                    attempts,
                    last_error = last_error.as_deref().unwrap_or("none"),
                    "Hub unreachable, giving up"
                ),
                other => tracing::info!(event = ?other, "Connection event"),
            }
        }
    });
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        base_url = %config.api_base_url(),
        hub_url = %config.hub_url(),
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

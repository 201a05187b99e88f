//! Hub WebSocket Transport
//!
//! Opens WebSocket links to the market data hub and speaks the JSON hub
//! protocol over them. Negotiation is skipped: the client connects straight
//! to the hub URL and performs the protocol handshake.
//!
//! # Link Lifecycle
//!
//! 1. `connect_async` to `ws(s)://{host}/marketDataHub`
//! 2. Handshake `{"protocol":"json","version":1}␞`, expect `{}␞`
//! 3. A pump task forwards client operations and decoded pushes until the
//!    server closes, goes silent, or the owner drops the link

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, HubCodec};
use super::keepalive::{self, KeepAliveConfig, KeepAliveSignal, LinkActivity};
use super::messages::HubFrame;
use crate::ClientConfig;
use crate::application::ports::{
    HubEvent, HubRequest, StreamTransport, TransportError, TransportLink,
};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Reasons a link stops.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Server sent a close frame.
    #[error("server closed the connection: {}", .0.as_deref().unwrap_or("no reason given"))]
    ServerClosed(Option<String>),

    /// Nothing received within the server timeout.
    #[error("server timeout")]
    ServerTimeout,

    /// WebSocket stream ended.
    #[error("connection closed")]
    StreamEnded,

    /// The link owner stopped listening.
    #[error("link owner gone")]
    OwnerGone,
}

// =============================================================================
// Configuration
// =============================================================================

/// Hub connection configuration.
#[derive(Debug, Clone)]
pub struct HubConnectionConfig {
    /// WebSocket URL of the hub.
    pub url: String,
    /// Keep-alive settings.
    pub keepalive: KeepAliveConfig,
    /// Time allowed for the handshake.
    pub handshake_timeout: Duration,
    /// Buffer between the pump and the link owner.
    pub inbound_capacity: usize,
}

impl HubConnectionConfig {
    /// Create a configuration for `url` with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            keepalive: KeepAliveConfig::default(),
            handshake_timeout: Duration::from_secs(15),
            inbound_capacity: 1024,
        }
    }

    /// Create configuration from `ClientConfig`.
    #[must_use]
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            url: config.hub_url(),
            keepalive: KeepAliveConfig::from_stream_settings(&config.stream),
            handshake_timeout: config.stream.handshake_timeout,
            inbound_capacity: config.stream.event_capacity.max(1),
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// [`StreamTransport`] over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    config: HubConnectionConfig,
    codec: HubCodec,
}

impl WebSocketTransport {
    /// Create a new transport.
    #[must_use]
    pub const fn new(config: HubConnectionConfig) -> Self {
        Self {
            config,
            codec: HubCodec::new(),
        }
    }

    /// Hub URL this transport connects to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn await_handshake<R>(&self, read: &mut R) -> Result<String, TransportError>
    where
        R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let mut buffer = String::new();

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    buffer.push_str(&text);
                    match self.codec.decode_handshake(&buffer) {
                        Ok(rest) => return Ok(rest.to_string()),
                        Err(CodecError::IncompleteHandshake) => {}
                        Err(e) => return Err(TransportError::HandshakeFailed(e.to_string())),
                    }
                }
                Ok(Message::Close(_)) => {
                    return Err(TransportError::HandshakeFailed(
                        "closed during handshake".to_string(),
                    ));
                }
                Ok(_) => {}
                Err(e) => return Err(TransportError::ConnectionFailed(e.to_string())),
            }
        }

        Err(TransportError::HandshakeFailed(
            "stream ended during handshake".to_string(),
        ))
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn open(&self) -> Result<TransportLink, TransportError> {
        tracing::info!(url = %self.config.url, "Connecting to market data hub");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.config.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let handshake = self
            .codec
            .encode_handshake()
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        write
            .send(Message::Text(handshake.into()))
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let leftover = tokio::time::timeout(self.config.handshake_timeout, self.await_handshake(&mut read))
            .await
            .map_err(|_| TransportError::HandshakeFailed("handshake timed out".to_string()))??;

        tracing::info!("Hub handshake completed");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity);

        let pump = LinkPump {
            codec: self.codec.clone(),
            keepalive: self.config.keepalive.clone(),
            inbound_tx,
        };
        tokio::spawn(async move {
            match pump.run(write, read, outbound_rx, leftover).await {
                Ok(()) => tracing::debug!("Hub link closed by owner"),
                Err(e) => tracing::warn!(error = %e, "Hub link ended"),
            }
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

// =============================================================================
// Link Pump
// =============================================================================

struct LinkPump {
    codec: HubCodec,
    keepalive: KeepAliveConfig,
    inbound_tx: mpsc::Sender<HubEvent>,
}

impl LinkPump {
    /// Returns `Ok` only when the owner dropped the link.
    async fn run<W, R>(
        self,
        mut write: W,
        mut read: R,
        mut outbound_rx: mpsc::UnboundedReceiver<HubRequest>,
        leftover: String,
    ) -> Result<(), LinkError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
        R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let activity = Arc::new(LinkActivity::new());
        let monitor_cancel = CancellationToken::new();
        let _monitor_guard = monitor_cancel.clone().drop_guard();
        let mut keepalive_rx =
            keepalive::spawn_monitor(self.keepalive.clone(), Arc::clone(&activity), monitor_cancel);

        if !leftover.is_empty() {
            self.handle_text(&leftover).await?;
        }

        loop {
            tokio::select! {
                request = outbound_rx.recv() => {
                    let Some(request) = request else {
                        if let Ok(close) = self.codec.encode_close() {
                            let _ = write.send(Message::Text(close.into())).await;
                        }
                        let _ = write.close().await;
                        return Ok(());
                    };

                    match self.codec.encode_request(&request) {
                        Ok(text) => {
                            write.send(Message::Text(text.into())).await?;
                            activity.touch_outbound();
                            tracing::debug!(symbol = request.symbol(), ?request, "Sent hub invocation");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, ?request, "Failed to encode hub invocation");
                        }
                    }
                }
                signal = keepalive_rx.recv() => {
                    match signal {
                        Some(KeepAliveSignal::Ping) => {
                            let ping = self.codec.encode_ping()?;
                            write.send(Message::Text(ping.into())).await?;
                            activity.touch_outbound();
                        }
                        Some(KeepAliveSignal::ServerSilent(_)) | None => {
                            return Err(LinkError::ServerTimeout);
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            activity.touch_inbound();
                            self.handle_text(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            activity.touch_inbound();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(LinkError::ServerClosed(
                                frame.map(|f| f.reason.to_string()),
                            ));
                        }
                        Some(Ok(_)) => {
                            activity.touch_inbound();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(LinkError::StreamEnded),
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) -> Result<(), LinkError> {
        for decoded in self.codec.decode(text) {
            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed hub frame");
                    metrics::record_frame_error(e.kind());
                    continue;
                }
            };

            if let HubFrame::Close(close) = &frame {
                return Err(LinkError::ServerClosed(close.error.clone()));
            }

            match self.codec.to_event(frame) {
                Ok(Some(event)) => {
                    if self.inbound_tx.send(event).await.is_err() {
                        return Err(LinkError::OwnerGone);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring hub invocation");
                    metrics::record_frame_error(e.kind());
                }
            }
        }

        Ok(())
    }
}
